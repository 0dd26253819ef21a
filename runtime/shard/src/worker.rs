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

use std::{sync::Arc, time::Instant};

use pisa_error::error::{Error, ErrorKind};
use strategy::{
    datasource::{DataSourceRepository, Optional, PhysicalConn, ResultSet},
    value::Value,
};
use tracing::{debug, warn};

use crate::metrics::ShardMetricsCollector;

#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    Update { sql: String, params: Vec<Value> },
    Batch { sql: String, batch: Vec<Vec<Value>> },
    Query { sql: String, params: Vec<Value>, max_rows: usize },
}

impl Work {
    pub fn sql(&self) -> &str {
        match self {
            Work::Update { sql, .. } | Work::Batch { sql, .. } | Work::Query { sql, .. } => sql,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    Count(u64),
    ResultSet(ResultSet),
}

/// Runs one fragment on a connection of its shard. The connection goes back
/// to the pool on every exit path, and is dropped instead when the error is
/// fatal for the datasource or the task is cancelled mid statement.
pub struct Worker<C: PhysicalConn> {
    repository: Arc<DataSourceRepository<C>>,
    option: Optional,
    work: Work,
    typ: &'static str,
}

impl<C: PhysicalConn> Worker<C> {
    pub fn new(
        repository: Arc<DataSourceRepository<C>>,
        option: Optional,
        work: Work,
        typ: &'static str,
    ) -> Self {
        Worker { repository, option, work, typ }
    }

    pub fn shard_name(&self) -> &str {
        &self.option.shard_name
    }

    pub async fn run(self) -> Result<WorkerOutput, Error> {
        let shard = self.option.shard_name.clone();
        let mut ds_conn = self.repository.get_connection(&self.option).await?;

        debug!("shard {} datasource {} run {:?}", shard, ds_conn.uid(), self.work.sql());
        let now = Instant::now();
        ds_conn.conn.set_busy();
        let res = match &self.work {
            Work::Update { sql, params } => {
                ds_conn.conn.execute(sql, params).await.map(WorkerOutput::Count)
            }
            Work::Batch { sql, batch } => ds_conn
                .conn
                .execute_batch(sql, batch)
                .await
                .map(|counts| WorkerOutput::Count(counts.iter().sum())),
            Work::Query { sql, params, max_rows } => {
                ds_conn.conn.query(sql, params, *max_rows).await.map(WorkerOutput::ResultSet)
            }
        };
        ds_conn.conn.set_idle();

        let collector = ShardMetricsCollector;
        match res {
            Ok(output) => {
                collector.fragment_executed(&shard, self.typ, now.elapsed().as_secs_f64());
                Ok(output)
            }
            Err(e) => {
                collector.fragment_failed(&shard, self.typ);
                if ds_conn.datasource.is_exception_fatal(&e) {
                    warn!("shard {} datasource {} fatal error: {}", shard, ds_conn.uid(), e);
                    self.repository.report_failure(ds_conn.uid());
                    ds_conn.discard();
                }
                Err(Error::from(ErrorKind::Fragment {
                    shard,
                    sql: self.work.sql().to_string(),
                    source: e,
                }))
            }
        }
    }
}
