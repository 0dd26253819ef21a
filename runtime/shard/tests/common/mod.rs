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

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use conn_pool::{ConnAttr, ConnLike};
use pisa_error::error::SqlError;
use runtime_shard::PreparedRoutingExecutor;
use strategy::{
    config::Sharding,
    datasource::{DataSourceRepository, PhysicalConn, ResultSet, Row},
    route::RoutingHandler,
    rule::AlgorithmRegistry,
    value::Value,
};

pub const SHARDING: &str = r#"
[[datasource]]
uid = "ds0"
exception_sorter = "mysql"
validation_query = "SELECT 1"

[[datasource]]
uid = "ds1"
exception_sorter = "mysql"
validation_query = "SELECT 1"

[[datasource]]
uid = "ds1r"
exception_sorter = "mysql"
validation_query = "SELECT 1"

[[datasource]]
uid = "ds2a"
exception_sorter = "mysql"

[[datasource]]
uid = "ds2b"
exception_sorter = "mysql"

[[shard]]
name = "s0"
member = [{ uid = "ds0" }]

[[shard]]
name = "s1"
member = [{ uid = "ds1", r_weight = 0 }, { uid = "ds1r", w_weight = 0 }]

[[shard]]
name = "s2"
member = [{ uid = "ds2a" }, { uid = "ds2b" }]

[[table_router]]
id = "orders_router"
partition = [{ shard = "s0" }, { shard = "s1" }]
[table_router.rule]
columns = [{ name = "user_id" }]
expression = "${user_id} % 2"

[[table]]
name = "orders"
router = "orders_router"

[[table]]
name = "region"
broadcast = ["s0", "s1"]

[[table]]
name = "audit"
shard = "s2"
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub uid: String,
    pub kind: &'static str,
    pub sql: String,
    pub params: Vec<Vec<Value>>,
}

/// Behaviour and call log of one fake datasource.
#[derive(Debug, Default)]
pub struct FakeState {
    pub rows: Mutex<Vec<Row>>,
    pub fail: Mutex<Option<SqlError>>,
    pub down: AtomicBool,
    pub delay_ms: AtomicU64,
}

impl FakeState {
    pub fn set_rows(&self, ids: &[i64]) {
        *self.rows.lock().unwrap() = ids.iter().map(|i| vec![Value::from(*i)]).collect();
    }

    pub fn fail_with(&self, err: Option<SqlError>) {
        *self.fail.lock().unwrap() = err;
    }
}

#[derive(Debug, Clone)]
pub struct FakeConn {
    uid: String,
    state: Arc<FakeState>,
    log: Arc<Mutex<Vec<Call>>>,
}

impl FakeConn {
    async fn enter(&self, kind: &'static str, sql: &str, params: Vec<Vec<Value>>) -> Result<(), SqlError> {
        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let fail = self.state.fail.lock().unwrap().clone();
        if let Some(err) = fail {
            return Err(err);
        }
        self.log.lock().unwrap().push(Call {
            uid: self.uid.clone(),
            kind,
            sql: sql.to_string(),
            params,
        });
        Ok(())
    }
}

#[async_trait]
impl ConnLike for FakeConn {
    type Error = SqlError;

    async fn build_conn(&self) -> Result<Self, Self::Error> {
        if self.state.down.load(Ordering::SeqCst) {
            return Err(SqlError::new(2003, "Can't connect to MySQL server").with_state("HY000"));
        }
        Ok(self.clone())
    }
}

impl ConnAttr for FakeConn {
    fn get_endpoint(&self) -> String {
        self.uid.clone()
    }
}

#[async_trait]
impl PhysicalConn for FakeConn {
    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<ResultSet, SqlError> {
        self.enter("query", sql, vec![params.to_vec()]).await?;
        let rows = self.state.rows.lock().unwrap().clone();
        let take = if max_rows == 0 { rows.len() } else { max_rows };
        Ok(ResultSet::new(vec!["user_id".into()], rows.into_iter().take(take).collect()))
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, SqlError> {
        self.enter("execute", sql, vec![params.to_vec()]).await?;
        Ok(1)
    }

    async fn execute_batch(&mut self, sql: &str, batch: &[Vec<Value>]) -> Result<Vec<u64>, SqlError> {
        self.enter("batch", sql, batch.to_vec()).await?;
        Ok(vec![1; batch.len()])
    }

    async fn validate(&mut self, _validation_query: Option<&str>) -> Result<(), SqlError> {
        if self.state.down.load(Ordering::SeqCst) {
            return Err(SqlError::new(2006, "MySQL server has gone away"));
        }
        Ok(())
    }
}

pub struct Cluster {
    pub sharding: Sharding,
    pub states: HashMap<String, Arc<FakeState>>,
    pub log: Arc<Mutex<Vec<Call>>>,
    pub repository: Arc<DataSourceRepository<FakeConn>>,
    pub handler: Arc<RoutingHandler>,
}

impl Cluster {
    pub fn new() -> Self {
        let sharding: Sharding = toml::from_str(SHARDING).unwrap();
        let log = Arc::new(Mutex::new(vec![]));
        let states = sharding
            .datasource
            .iter()
            .map(|ds| (ds.uid.clone(), Arc::new(FakeState::default())))
            .collect::<HashMap<_, _>>();

        let repository = DataSourceRepository::build(&sharding, |ds| FakeConn {
            uid: ds.uid.clone(),
            state: states[&ds.uid].clone(),
            log: log.clone(),
        })
        .unwrap();
        let handler = RoutingHandler::build(&sharding, &AlgorithmRegistry::default()).unwrap();

        Cluster {
            sharding,
            states,
            log,
            repository: Arc::new(repository),
            handler: Arc::new(handler),
        }
    }

    pub fn executor(&self) -> PreparedRoutingExecutor<FakeConn> {
        PreparedRoutingExecutor::new(
            self.handler.clone(),
            self.repository.clone(),
            &self.sharding.executor,
        )
    }

    pub fn state(&self, uid: &str) -> &FakeState {
        &self.states[uid]
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn calls_on(&self, uid: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.uid == uid).collect()
    }
}
