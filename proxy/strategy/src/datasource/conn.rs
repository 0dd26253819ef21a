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

use std::time::Instant;

use async_trait::async_trait;
use conn_pool::{ConnAttr, ConnLike};
use pisa_error::error::SqlError;
use tracing::debug;

use crate::value::Value;

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        ResultSet { columns, rows }
    }
}

/// Physical connection to one datasource. The registered value of a pool
/// doubles as its factory, see `ConnLike::build_conn`.
#[async_trait]
pub trait PhysicalConn: ConnLike<Error = SqlError> + ConnAttr {
    /// Runs a query, fetching at most `max_rows` rows when it is not 0.
    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<ResultSet, SqlError>;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, SqlError>;

    /// Same statement bound once per parameter set, one count per set.
    async fn execute_batch(
        &mut self,
        sql: &str,
        batch: &[Vec<Value>],
    ) -> Result<Vec<u64>, SqlError> {
        let mut counts = Vec::with_capacity(batch.len());
        for params in batch {
            counts.push(self.execute(sql, params).await?);
        }
        Ok(counts)
    }

    async fn validate(&mut self, validation_query: Option<&str>) -> Result<(), SqlError> {
        if let Some(sql) = validation_query {
            self.query(sql, &[], 1).await?;
        }
        Ok(())
    }
}

/// Logs every statement passing through the wrapped connection.
#[derive(Debug)]
pub struct TracedConn<C> {
    inner: C,
}

impl<C> TracedConn<C> {
    pub fn new(inner: C) -> Self {
        TracedConn { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: PhysicalConn> ConnLike for TracedConn<C> {
    type Error = SqlError;

    async fn build_conn(&self) -> Result<Self, Self::Error> {
        Ok(TracedConn { inner: self.inner.build_conn().await? })
    }
}

impl<C: PhysicalConn> ConnAttr for TracedConn<C> {
    fn get_endpoint(&self) -> String {
        self.inner.get_endpoint()
    }
}

#[async_trait]
impl<C: PhysicalConn> PhysicalConn for TracedConn<C> {
    async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        max_rows: usize,
    ) -> Result<ResultSet, SqlError> {
        let now = Instant::now();
        let res = self.inner.query(sql, params, max_rows).await;
        debug!(
            "{} query {:?} params {:?} ok {} in {:?}",
            self.inner.get_endpoint(),
            sql,
            params,
            res.is_ok(),
            now.elapsed()
        );
        res
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, SqlError> {
        let now = Instant::now();
        let res = self.inner.execute(sql, params).await;
        debug!(
            "{} execute {:?} params {:?} ok {} in {:?}",
            self.inner.get_endpoint(),
            sql,
            params,
            res.is_ok(),
            now.elapsed()
        );
        res
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        batch: &[Vec<Value>],
    ) -> Result<Vec<u64>, SqlError> {
        let now = Instant::now();
        let res = self.inner.execute_batch(sql, batch).await;
        debug!(
            "{} batch {:?} size {} ok {} in {:?}",
            self.inner.get_endpoint(),
            sql,
            batch.len(),
            res.is_ok(),
            now.elapsed()
        );
        res
    }

    async fn validate(&mut self, validation_query: Option<&str>) -> Result<(), SqlError> {
        self.inner.validate(validation_query).await
    }
}
