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

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use indexmap::IndexMap;
use pisa_error::error::{Error, ErrorKind};
use strategy::{
    config::ExecutorConfig,
    datasource::{DataSourceRepository, Optional, PhysicalConn, ResultSet},
    prepared::{Prepared, StatementKind},
    route::RoutingHandler,
    sharding_rewrite::{RewritePlan, ShardingRewrite},
    value::Value,
};
use tokio::{sync::Semaphore, task::JoinHandle, time};
use tracing::{debug, warn};

use crate::{
    cursor::MergedCursor,
    metrics::ShardMetricsCollector,
    worker::{Work, Worker, WorkerOutput},
};

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("{0} statement can not be executed as {1}")]
    WrongStatementKind(&'static str, &'static str),

    #[error("unexpected worker output for {0}")]
    UnexpectedOutput(&'static str),
}

/// Per statement execution settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub query_timeout: Option<Duration>,
    pub retry: usize,
}

impl Session {
    pub fn query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }
}

impl From<&ExecutorConfig> for Session {
    fn from(config: &ExecutorConfig) -> Self {
        Session { query_timeout: config.query_timeout_ms.map(Duration::from_millis), retry: 0 }
    }
}

/// Routes a prepared statement, runs its fragments in parallel and folds
/// the outcomes: affected rows are summed, result sets concatenated.
pub struct PreparedRoutingExecutor<C: PhysicalConn> {
    rewrite: ShardingRewrite,
    repository: Arc<DataSourceRepository<C>>,
    semaphore: Arc<Semaphore>,
    session: Session,
}

impl<C: PhysicalConn> PreparedRoutingExecutor<C> {
    pub fn new(
        handler: Arc<RoutingHandler>,
        repository: Arc<DataSourceRepository<C>>,
        config: &ExecutorConfig,
    ) -> Self {
        let permits = config.max_concurrency.unwrap_or_else(num_cpus::get).max(1);
        PreparedRoutingExecutor {
            rewrite: ShardingRewrite::new(handler),
            repository,
            semaphore: Arc::new(Semaphore::new(permits)),
            session: Session::from(config),
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Fragments the statement would run, without running them.
    pub fn explain(&self, prepared: &Prepared) -> Result<RewritePlan, Error> {
        self.rewrite.plan(prepared)
    }

    /// Executes a DML statement and returns the affected row count.
    pub async fn update(&self, prepared: &Prepared) -> Result<u64, Error> {
        let sql = prepared.display_sql();
        if prepared.kind.is_query() {
            let err = ExecuteError::WrongStatementKind("select", "update");
            return Err(runtime_error(err).with_sql(sql));
        }
        let plan = self.rewrite.plan(prepared)?;
        let typ = prepared.kind.as_str();

        let mut workers = vec![];
        match plan.kind {
            StatementKind::Insert | StatementKind::Merge => {
                // Rows rendering to the same SQL on the same shard share one batch.
                let mut groups: IndexMap<(String, String), Vec<Vec<Value>>> = IndexMap::new();
                for f in plan.fragments.iter() {
                    groups
                        .entry((f.shard_name.clone(), f.sql.clone()))
                        .or_default()
                        .push(f.params.clone());
                }
                for ((shard, sql), mut batch) in groups {
                    let work = if batch.len() == 1 {
                        Work::Update { sql, params: batch.remove(0) }
                    } else {
                        Work::Batch { sql, batch }
                    };
                    workers.push(self.worker(&shard, false, work, typ));
                }
            }
            _ => {
                for f in plan.fragments.iter() {
                    let work = Work::Update { sql: f.sql.clone(), params: f.params.clone() };
                    workers.push(self.worker(&f.shard_name, false, work, typ));
                }
            }
        }

        // Broadcast replicas are copies, count only the first one.
        let first_shard = workers.first().map(|w| w.shard_name().to_string());
        let shards = workers.iter().map(|w| w.shard_name().to_string()).collect::<Vec<_>>();
        let outputs = self.invoke_all(workers, typ).await.map_err(|e| e.with_sql(&sql))?;

        let mut affected = 0;
        for (shard, output) in shards.iter().zip(outputs) {
            if plan.broadcast && Some(shard) != first_shard.as_ref() {
                continue;
            }
            match output {
                WorkerOutput::Count(n) => affected += n,
                WorkerOutput::ResultSet(_) => {
                    return Err(runtime_error(ExecuteError::UnexpectedOutput("update")).with_sql(sql))
                }
            }
        }
        debug!("{} affected {} row(s)", sql, affected);
        Ok(affected)
    }

    /// Executes a SELECT. `max_rows` caps every fragment and the merged
    /// cursor, 0 means unlimited.
    pub async fn query(&self, prepared: &Prepared, max_rows: usize) -> Result<MergedCursor, Error> {
        let sql = prepared.display_sql();
        if !prepared.kind.is_query() {
            let err = ExecuteError::WrongStatementKind(prepared.kind.as_str(), "query");
            return Err(runtime_error(err).with_sql(sql));
        }
        let plan = self.rewrite.plan(prepared)?;
        let typ = prepared.kind.as_str();

        let workers = plan
            .fragments
            .iter()
            .map(|f| {
                let work = Work::Query { sql: f.sql.clone(), params: f.params.clone(), max_rows };
                self.worker(&f.shard_name, true, work, typ)
            })
            .collect::<Vec<_>>();

        let outputs = self.invoke_all(workers, typ).await.map_err(|e| e.with_sql(&sql))?;
        let results = outputs
            .into_iter()
            .map(|o| match o {
                WorkerOutput::ResultSet(rs) => Ok(rs),
                WorkerOutput::Count(_) => Err(runtime_error(ExecuteError::UnexpectedOutput("query"))),
            })
            .collect::<Result<Vec<ResultSet>, Error>>()
            .map_err(|e| e.with_sql(&sql))?;
        Ok(MergedCursor::new(results, max_rows))
    }

    fn worker(&self, shard: &str, read_only: bool, work: Work, typ: &'static str) -> Worker<C> {
        let option = Optional::new(shard).read_only(read_only).retry(self.session.retry);
        Worker::new(Arc::clone(&self.repository), option, work, typ)
    }

    /// Runs every worker and returns outputs in submission order. A single
    /// worker runs inline, more are spawned and bounded by the semaphore.
    /// The first failure fails the whole call, already applied writes stay.
    async fn invoke_all(
        &self,
        workers: Vec<Worker<C>>,
        typ: &'static str,
    ) -> Result<Vec<WorkerOutput>, Error> {
        let timeout = self.session.query_timeout;
        let timeout_error = |d: Duration| {
            ShardMetricsCollector.statement_timeout(typ);
            Error::from(ErrorKind::Timeout(d.as_millis() as u64))
        };

        if workers.len() <= 1 {
            let worker = match workers.into_iter().next() {
                Some(w) => w,
                None => return Ok(vec![]),
            };
            let output = match timeout {
                Some(d) => time::timeout(d, worker.run()).await.map_err(|_| timeout_error(d))??,
                None => worker.run().await?,
            };
            return Ok(vec![output]);
        }

        let mut handles: Vec<JoinHandle<Result<WorkerOutput, Error>>> = workers
            .into_iter()
            .map(|worker| {
                let semaphore = Arc::clone(&self.semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| ErrorKind::Runtime(e.into()))?;
                    worker.run().await
                })
            })
            .collect();

        let joined = match timeout {
            Some(d) => match time::timeout(d, join_all(handles.iter_mut())).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        "statement timed out after {:?}, cancelling {} fragment(s)",
                        d,
                        handles.len()
                    );
                    for handle in handles.iter() {
                        handle.abort();
                    }
                    return Err(timeout_error(d));
                }
            },
            None => join_all(handles.iter_mut()).await,
        };

        let mut outputs = Vec::with_capacity(joined.len());
        for res in joined {
            let output = res.map_err(|e| ErrorKind::Runtime(e.into()))??;
            outputs.push(output);
        }
        Ok(outputs)
    }
}

fn runtime_error(err: ExecuteError) -> Error {
    Error::from(ErrorKind::Runtime(err.into()))
}
