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

use loadbalance::balance::AlgorithmName;
use serde::{Deserialize, Serialize};

use crate::datasource::ExceptionSorter;

/// Whole sharding topology: datasources, shards grouping them, routing rules
/// and the logical tables bound to those rules.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Sharding {
    #[serde(default)]
    pub datasource: Vec<DataSourceConfig>,
    #[serde(default)]
    pub shard: Vec<ShardConfig>,
    #[serde(default)]
    pub table_router: Vec<TableRouterConfig>,
    #[serde(default)]
    pub table: Vec<TableConfig>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DataSourceConfig {
    pub uid: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub db: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub validation_query: Option<String>,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout: u64,
    #[serde(default)]
    pub exception_sorter: ExceptionSorter,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ShardConfig {
    pub name: String,
    #[serde(default)]
    pub member: Vec<ShardMemberConfig>,
    // Overrides the balancer picked from the shard topology
    pub balance: Option<AlgorithmName>,
    // Ring nodes per unit of weight for consistent_hash, 16 when unset
    pub replicas: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ShardMemberConfig {
    pub uid: String,
    #[serde(default = "default_weight")]
    pub r_weight: i64,
    #[serde(default = "default_weight")]
    pub w_weight: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TableRouterConfig {
    pub id: String,
    #[serde(default)]
    pub partition: Vec<PartitionConfig>,
    pub rule: RuleConfig,
}

/// One shard and the table suffixes it holds. An empty suffix list means the
/// shard holds the table under its logical name.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PartitionConfig {
    pub shard: String,
    #[serde(default)]
    pub suffix: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RuleConfig {
    #[serde(default)]
    pub columns: Vec<RuleColumnConfig>,
    pub algorithm: Option<String>,
    pub expression: Option<String>,
    #[serde(default)]
    pub args: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RuleColumnConfig {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

/// Logical table. `router` makes it sharded, `broadcast` replicated, a bare
/// `shard` pins it to that single shard.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TableConfig {
    pub name: String,
    pub shard: Option<String>,
    pub router: Option<String>,
    pub broadcast: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval_ms: default_monitor_interval(),
            validation_timeout_ms: default_validation_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ExecutorConfig {
    pub query_timeout_ms: Option<u64>,
    // Falls back to the number of cpus when unset
    pub max_concurrency: Option<usize>,
}

fn default_weight() -> i64 {
    1
}

fn default_required() -> bool {
    true
}

fn default_pool_size() -> usize {
    64
}

fn default_monitor_interval() -> u64 {
    500
}

fn default_validation_timeout() -> u64 {
    3000
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_sharding_config() {
        let config = r#"
            [[datasource]]
            uid = "ds0"
            addr = "127.0.0.1:3306"
            validation_query = "SELECT 1"
            exception_sorter = "mysql"

            [[datasource]]
            uid = "ds1"

            [[shard]]
            name = "s0"
            member = [{ uid = "ds0" }, { uid = "ds1", w_weight = 0 }]

            [[table_router]]
            id = "orders_router"
            partition = [{ shard = "s0" }, { shard = "s1" }]
            [table_router.rule]
            columns = [{ name = "user_id" }]
            algorithm = "mod"

            [[table]]
            name = "orders"
            router = "orders_router"

            [[table]]
            name = "region"
            broadcast = ["s0", "s1"]
        "#;

        let sharding: Sharding = toml::from_str(config).unwrap();
        assert_eq!(sharding.datasource.len(), 2);
        assert_eq!(sharding.datasource[0].exception_sorter, ExceptionSorter::MySql);
        assert_eq!(sharding.datasource[1].exception_sorter, ExceptionSorter::Null);
        assert_eq!(sharding.datasource[1].pool_size, 64);
        assert_eq!(sharding.shard[0].member[1].r_weight, 1);
        assert_eq!(sharding.shard[0].member[1].w_weight, 0);
        assert!(sharding.table_router[0].rule.columns[0].required);
        assert_eq!(sharding.table[1].broadcast.as_ref().unwrap().len(), 2);
        assert_eq!(sharding.monitor.interval_ms, 500);
        assert_eq!(sharding.monitor.validation_timeout_ms, 3000);
        assert!(sharding.executor.query_timeout_ms.is_none());
    }
}
