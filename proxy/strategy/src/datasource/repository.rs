// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use conn_pool::PoolConn;
use crossbeam_channel::{unbounded, Receiver, Sender};
use pisa_error::error::{Error, ErrorKind, SqlError};
use tracing::{debug, warn};

use super::{
    conn::PhysicalConn,
    marker::SmartDataSource,
    optional::Optional,
    selector::{DataSourceSelector, MemberSpec},
};
use crate::config::{DataSourceConfig, Sharding};

/// Pooled connection together with the datasource it came from.
#[derive(Debug)]
pub struct DataSourceConn<C: PhysicalConn> {
    pub datasource: Arc<SmartDataSource<C>>,
    pub conn: PoolConn<C>,
}

impl<C: PhysicalConn> DataSourceConn<C> {
    pub fn uid(&self) -> &str {
        self.datasource.uid()
    }

    pub fn discard(self) {
        self.conn.discard()
    }
}

/// Shard name to selector and uid to datasource. Fatal failures are
/// reported through a channel drained by the health monitor, the only
/// writer of selector state.
#[derive(Debug)]
pub struct DataSourceRepository<C: PhysicalConn> {
    datasources: HashMap<String, Arc<SmartDataSource<C>>>,
    selectors: HashMap<String, DataSourceSelector>,
    report_tx: Sender<String>,
    report_rx: Receiver<String>,
}

fn config_error(msg: String) -> Error {
    Error::new(ErrorKind::Config(msg))
}

impl<C: PhysicalConn> DataSourceRepository<C> {
    /// `factory` makes the connection factory of each datasource.
    pub fn build<F>(config: &Sharding, factory: F) -> Result<Self, Error>
    where
        F: Fn(&DataSourceConfig) -> C,
    {
        let mut ds_configs = HashMap::new();
        for ds in &config.datasource {
            if ds_configs.insert(ds.uid.as_str(), ds).is_some() {
                return Err(config_error(format!("duplicate datasource {:?}", ds.uid)));
            }
        }

        let mut datasources = HashMap::new();
        let mut selectors = HashMap::new();
        for shard in &config.shard {
            let mut members = vec![];
            for m in &shard.member {
                let ds = ds_configs.get(m.uid.as_str()).ok_or_else(|| {
                    config_error(format!("shard {:?} references unknown datasource {:?}", shard.name, m.uid))
                })?;
                if datasources.contains_key(&m.uid) {
                    return Err(config_error(format!(
                        "datasource {:?} belongs to more than one shard",
                        m.uid
                    )));
                }
                let marker = SmartDataSource::new(ds, &shard.name, m, factory(ds));
                datasources.insert(m.uid.clone(), Arc::new(marker));
                members.push(MemberSpec {
                    uid: m.uid.clone(),
                    r_weight: m.r_weight,
                    w_weight: m.w_weight,
                });
            }

            let selector =
                DataSourceSelector::build(&shard.name, members, shard.balance, shard.replicas)?;
            if selectors.insert(shard.name.clone(), selector).is_some() {
                return Err(config_error(format!("duplicate shard {:?}", shard.name)));
            }
        }

        let used = datasources.keys().map(|k: &String| k.as_str()).collect::<HashSet<_>>();
        for uid in ds_configs.keys().filter(|uid| !used.contains(*uid)) {
            warn!("datasource {:?} is not a member of any shard", uid);
        }

        let (report_tx, report_rx) = unbounded();
        Ok(DataSourceRepository { datasources, selectors, report_tx, report_rx })
    }

    pub fn shard_names(&self) -> impl Iterator<Item = &String> {
        self.selectors.keys()
    }

    pub fn selector(&self, shard_name: &str) -> Option<&DataSourceSelector> {
        self.selectors.get(shard_name)
    }

    pub fn datasource(&self, uid: &str) -> Option<&Arc<SmartDataSource<C>>> {
        self.datasources.get(uid)
    }

    fn get_selector(&self, shard_name: &str) -> Result<&DataSourceSelector, Error> {
        self.selectors
            .get(shard_name)
            .ok_or_else(|| config_error(format!("unknown shard {:?}", shard_name)))
    }

    pub fn do_select(&self, option: &Optional) -> Result<Option<String>, Error> {
        let selector = self.get_selector(&option.shard_name)?;
        Ok(match &option.dbid {
            Some(dbid) => selector.select_dbid(dbid),
            None => selector.do_select(option.read_only),
        })
    }

    pub fn do_select_exclude(
        &self,
        option: &Optional,
        exclude: &[String],
    ) -> Result<Option<String>, Error> {
        let selector = self.get_selector(&option.shard_name)?;
        Ok(match &option.dbid {
            Some(dbid) if !exclude.contains(dbid) => selector.select_dbid(dbid),
            Some(_) => None,
            None => selector.do_select_exclude(option.read_only, exclude),
        })
    }

    /// Picks a datasource for `option` and takes a pooled connection from it.
    /// A datasource failing to hand out a connection is excluded and, when
    /// the error is fatal, reported. Up to `option.retry` more datasources
    /// are tried by linear scan before giving up.
    pub async fn get_connection(&self, option: &Optional) -> Result<DataSourceConn<C>, Error> {
        let mut exclude: Vec<String> = vec![];
        let mut last_err: Option<SqlError> = None;

        for attempt in 0..=option.retry {
            let uid = if attempt == 0 {
                self.do_select(option)?
            } else {
                self.do_select_exclude(option, &exclude)?
            };
            let uid = match uid {
                Some(uid) => uid,
                None => continue,
            };
            let datasource = match self.datasources.get(&uid) {
                Some(ds) => Arc::clone(ds),
                None => continue,
            };

            match datasource.get_connection().await {
                Ok(conn) => {
                    debug!("shard {} picked datasource {}", option.shard_name, uid);
                    return Ok(DataSourceConn { datasource, conn });
                }
                Err(e) => {
                    warn!("datasource {} connection error: {}", uid, e);
                    if datasource.is_exception_fatal(&e) {
                        self.report_failure(&uid);
                    }
                    exclude.push(uid);
                    last_err = Some(e);
                }
            }
        }

        if let Some(e) = last_err {
            debug!("shard {} exhausted, last error: {}", option.shard_name, e);
        }
        Err(Error::new(ErrorKind::Unavailable(option.shard_name.clone())))
    }

    /// Counts the failure and hands the datasource to the health monitor.
    pub fn report_failure(&self, uid: &str) {
        if let Some(ds) = self.datasources.get(uid) {
            let count = ds.mark_failed();
            warn!("datasource {} reported failed, failed count {}", uid, count);
            let _ = self.report_tx.send(uid.to_string());
        }
    }

    pub fn failure_reports(&self) -> Receiver<String> {
        self.report_rx.clone()
    }

    // Takes the datasource out of its shard selector.
    pub fn abnormal(&self, uid: &str) -> bool {
        match self.datasources.get(uid) {
            Some(ds) => {
                ds.clear_idle();
                self.selectors.get(ds.shard_name()).map_or(false, |s| s.abnormal(uid))
            }
            None => false,
        }
    }

    pub fn wakeup(&self, uid: &str) -> bool {
        match self.datasources.get(uid) {
            Some(ds) => {
                ds.reset_failed();
                self.selectors.get(ds.shard_name()).map_or(false, |s| s.wakeup(uid))
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::datasource::conn::test::MemConn;

    pub(crate) fn repository_config() -> Sharding {
        let config = r#"
            [[datasource]]
            uid = "m0"
            exception_sorter = "mysql"
            [[datasource]]
            uid = "r0"
            exception_sorter = "mysql"
            [[datasource]]
            uid = "r1"
            exception_sorter = "mysql"

            [[shard]]
            name = "s0"
            member = [{ uid = "m0", r_weight = 0 }, { uid = "r0", w_weight = 0 }, { uid = "r1", w_weight = 0 }]
        "#;
        toml::from_str(config).unwrap()
    }

    fn repository() -> (DataSourceRepository<MemConn>, HashMap<String, MemConn>) {
        let conns = ["m0", "r0", "r1"]
            .iter()
            .map(|uid| (uid.to_string(), MemConn::new(uid)))
            .collect::<HashMap<_, _>>();
        let repo =
            DataSourceRepository::build(&repository_config(), |ds| conns[&ds.uid].clone()).unwrap();
        (repo, conns)
    }

    #[tokio::test]
    async fn test_get_connection_by_role() {
        let (repo, _) = repository();
        let conn = repo.get_connection(&Optional::new("s0")).await.unwrap();
        assert_eq!(conn.uid(), "m0");
        let conn = repo.get_connection(&Optional::new("s0").read_only(true)).await.unwrap();
        assert_ne!(conn.uid(), "m0");
        let conn = repo.get_connection(&Optional::new("s0").dbid("r1")).await.unwrap();
        assert_eq!(conn.uid(), "r1");

        assert!(repo.get_connection(&Optional::new("s9")).await.is_err());
    }

    #[tokio::test]
    async fn test_get_connection_retry_excludes_failed() {
        let (repo, conns) = repository();
        conns["r0"].down.store(true, Ordering::SeqCst);
        let reports = repo.failure_reports();

        // Whichever replica the balancer picks first, r1 serves the call.
        for _ in 0..10 {
            let conn = repo.get_connection(&Optional::new("s0").read_only(true).retry(2)).await.unwrap();
            assert_eq!(conn.uid(), "r1");
            conn.discard();
        }
        assert!(reports.try_iter().all(|uid| uid == "r0"));

        let err = repo.get_connection(&Optional::new("s0").dbid("r0").retry(3)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(repo.datasource("r0").unwrap().failed_count() > 0);
    }

    #[tokio::test]
    async fn test_abnormal_and_wakeup() {
        let (repo, conns) = repository();
        conns["m0"].down.store(true, Ordering::SeqCst);
        let err = repo.get_connection(&Optional::new("s0")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(repo.failure_reports().try_recv().unwrap(), "m0");

        assert!(repo.abnormal("m0"));
        assert_eq!(repo.do_select(&Optional::new("s0")).unwrap(), None);
        assert!(repo.wakeup("m0"));
        assert_eq!(repo.do_select(&Optional::new("s0")).unwrap().as_deref(), Some("m0"));
        assert_eq!(repo.datasource("m0").unwrap().failed_count(), 0);
    }

    #[test]
    fn test_build_errors() {
        let mut config = repository_config();
        config.shard[0].member[0].uid = "nope".into();
        assert!(DataSourceRepository::build(&config, |ds| MemConn::new(&ds.uid)).is_err());

        let mut config = repository_config();
        config.datasource.push(config.datasource[0].clone());
        assert!(DataSourceRepository::build(&config, |ds| MemConn::new(&ds.uid)).is_err());

        let mut config = repository_config();
        let shard = config.shard[0].clone();
        config.shard.push(shard);
        assert!(DataSourceRepository::build(&config, |ds| MemConn::new(&ds.uid)).is_err());
    }
}
