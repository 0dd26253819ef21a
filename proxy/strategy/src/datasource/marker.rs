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

use std::sync::atomic::{AtomicU64, Ordering};

use conn_pool::{Pool, PoolConn, PoolError};
use endpoint::endpoint::Endpoint;
use pisa_error::error::SqlError;
use tokio::time::{self, Duration};

use super::{conn::PhysicalConn, exception_sorter::ExceptionSorter};
use crate::config::{DataSourceConfig, ShardMemberConfig};

/// One physical datasource of a shard with its pool. Weights and validation
/// settings are fixed at construction, only the failure counter moves.
#[derive(Debug)]
pub struct SmartDataSource<C: PhysicalConn> {
    endpoint: Endpoint,
    r_weight: i64,
    w_weight: i64,
    validation_query: Option<String>,
    validation_timeout: Duration,
    exception_sorter: ExceptionSorter,
    failed_count: AtomicU64,
    pool: Pool<C>,
}

impl<C: PhysicalConn> SmartDataSource<C> {
    pub fn new(
        config: &DataSourceConfig,
        shard_name: &str,
        member: &ShardMemberConfig,
        factory: C,
    ) -> Self {
        let pool = Pool::new(config.pool_size);
        pool.set_factory(&config.uid, factory);

        SmartDataSource {
            endpoint: Endpoint {
                weight: member.w_weight,
                name: config.uid.clone(),
                shard: shard_name.to_string(),
                db: config.db.clone(),
                user: config.user.clone(),
                password: config.password.clone(),
                addr: config.addr.clone(),
            },
            r_weight: member.r_weight,
            w_weight: member.w_weight,
            validation_query: config.validation_query.clone(),
            validation_timeout: Duration::from_millis(config.validation_timeout),
            exception_sorter: config.exception_sorter,
            failed_count: AtomicU64::new(0),
            pool,
        }
    }

    pub fn uid(&self) -> &str {
        &self.endpoint.name
    }

    pub fn shard_name(&self) -> &str {
        &self.endpoint.shard
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn r_weight(&self) -> i64 {
        self.r_weight
    }

    pub fn w_weight(&self) -> i64 {
        self.w_weight
    }

    pub fn readable(&self) -> bool {
        self.r_weight > 0
    }

    pub fn writable(&self) -> bool {
        self.w_weight > 0
    }

    pub async fn get_connection(&self) -> Result<PoolConn<C>, SqlError> {
        self.pool.get_conn_with_endpoint(self.uid()).await.map_err(pool_error)
    }

    pub fn is_exception_fatal(&self, err: &SqlError) -> bool {
        self.exception_sorter.is_exception_fatal(err)
    }

    /// Opens a fresh connection and runs the validation query on it.
    pub async fn validate(&self) -> Result<(), SqlError> {
        let check = async {
            let mut conn = self.pool.build_conn(self.uid()).await.map_err(pool_error)?;
            conn.validate(self.validation_query.as_deref()).await
        };
        match time::timeout(self.validation_timeout, check).await {
            Ok(res) => res,
            Err(_) => Err(SqlError::new(0, format!(
                "validation timed out after {:?}",
                self.validation_timeout
            ))
            .with_state("08000")),
        }
    }

    // Idle connections of a datasource gone abnormal are likely broken.
    pub fn clear_idle(&self) {
        self.pool.clear(self.uid())
    }

    pub fn mark_failed(&self) -> u64 {
        self.failed_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_failed(&self) {
        self.failed_count.store(0, Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count.load(Ordering::Relaxed)
    }
}

fn pool_error(err: PoolError<SqlError>) -> SqlError {
    match err {
        PoolError::Build(e) => e,
        PoolError::FactoryNotFound(uid) => {
            SqlError::new(0, format!("no connection factory for {}", uid)).with_state("08003")
        }
    }
}
