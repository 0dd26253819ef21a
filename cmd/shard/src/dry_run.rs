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

use async_trait::async_trait;
use conn_pool::{ConnAttr, ConnLike};
use pisa_error::error::SqlError;
use strategy::{
    datasource::{PhysicalConn, ResultSet},
    value::Value,
};

/// Connection factory for planning only, every attempt to reach the
/// datasource fails.
#[derive(Debug, Clone)]
pub struct DryRunConn {
    uid: String,
}

impl DryRunConn {
    pub fn new(uid: &str) -> Self {
        DryRunConn { uid: uid.to_string() }
    }
}

fn dry_run_error(uid: &str) -> SqlError {
    SqlError::new(0, format!("datasource {} is not connected in dry run", uid)).with_state("08001")
}

#[async_trait]
impl ConnLike for DryRunConn {
    type Error = SqlError;

    async fn build_conn(&self) -> Result<Self, Self::Error> {
        Err(dry_run_error(&self.uid))
    }
}

impl ConnAttr for DryRunConn {
    fn get_endpoint(&self) -> String {
        self.uid.clone()
    }
}

#[async_trait]
impl PhysicalConn for DryRunConn {
    async fn query(
        &mut self,
        _sql: &str,
        _params: &[Value],
        _max_rows: usize,
    ) -> Result<ResultSet, SqlError> {
        Err(dry_run_error(&self.uid))
    }

    async fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64, SqlError> {
        Err(dry_run_error(&self.uid))
    }
}
