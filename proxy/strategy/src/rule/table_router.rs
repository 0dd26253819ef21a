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
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
};

use itertools::Itertools;
use pisa_error::error::{Error, ErrorKind, RoutingError};
use tracing::debug;

use super::{normalize_ident, AlgorithmRegistry, RuleExpression, RuleKey};
use crate::{config::TableRouterConfig, value::Value};

/// One physical target: a table in a shard, `suffix` appended to the
/// logical name. An empty suffix means the physical table keeps the logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableNode {
    pub shard_name: String,
    pub object_name: String,
    pub suffix: String,
}

impl TableNode {
    pub fn new(
        shard_name: impl Into<String>,
        object_name: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        TableNode {
            shard_name: shard_name.into(),
            object_name: object_name.into(),
            suffix: suffix.into(),
        }
    }

    pub fn composite_object_name(&self) -> String {
        format!("{}{}", self.object_name, self.suffix)
    }
}

impl fmt::Display for TableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.shard_name, self.composite_object_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionEntry {
    pub shard: String,
    pub suffix: String,
}

#[derive(Debug, Clone)]
pub struct TableRouter {
    pub id: String,
    pub partition: Vec<PartitionEntry>,
    pub rule: RuleExpression,
}

impl TableRouter {
    pub fn build(config: &TableRouterConfig, registry: &AlgorithmRegistry) -> Result<Self, Error> {
        let mut partition = vec![];
        let mut seen = HashSet::new();
        for p in &config.partition {
            let suffixes = if p.suffix.is_empty() { vec![String::new()] } else { p.suffix.clone() };
            for suffix in suffixes {
                let entry = PartitionEntry { shard: p.shard.clone(), suffix };
                if !seen.insert(entry.clone()) {
                    return Err(Error::new(ErrorKind::Config(format!(
                        "router {:?} lists shard {:?} suffix {:?} twice",
                        config.id, entry.shard, entry.suffix
                    ))));
                }
                partition.push(entry);
            }
        }
        if partition.is_empty() {
            return Err(Error::new(ErrorKind::Config(format!(
                "router {:?} has an empty partition",
                config.id
            ))));
        }

        let rule = RuleExpression::build(&config.rule, registry)?;
        Ok(TableRouter { id: config.id.clone(), partition, rule })
    }

    pub fn all_nodes(&self, table: &str) -> Vec<TableNode> {
        self.partition.iter().map(|p| TableNode::new(&p.shard, table, &p.suffix)).collect()
    }

    /// Routes one set of column values. Every required rule column must be
    /// bound to a non null value.
    pub fn route(
        &self,
        table: &str,
        values: &HashMap<String, Value>,
    ) -> Result<Vec<TableNode>, RoutingError> {
        let indices = self.route_indices(table, values)?;
        Ok(indices.into_iter().map(|i| self.node_at(table, i)).collect())
    }

    /// Routes the cartesian product of candidate values per rule column and
    /// returns the union of matched nodes in partition order.
    pub fn route_product(
        &self,
        table: &str,
        candidates: &[(String, Vec<Value>)],
    ) -> Result<Vec<TableNode>, RoutingError> {
        if candidates.iter().any(|(_, vs)| vs.is_empty()) {
            return Ok(vec![]);
        }

        let mut matched = BTreeSet::new();
        if candidates.is_empty() {
            matched.extend(self.match_indices(&HashMap::new())?);
        } else {
            let names = candidates.iter().map(|(c, _)| normalize_ident(c)).collect::<Vec<_>>();
            for combo in candidates.iter().map(|(_, vs)| vs.iter()).multi_cartesian_product() {
                let values = names
                    .iter()
                    .cloned()
                    .zip(combo.into_iter().cloned())
                    .collect::<HashMap<_, _>>();
                matched.extend(self.route_indices(table, &values)?);
            }
        }
        Ok(matched.into_iter().map(|i| self.node_at(table, i)).collect())
    }

    fn route_indices(
        &self,
        table: &str,
        values: &HashMap<String, Value>,
    ) -> Result<Vec<usize>, RoutingError> {
        for col in self.rule.required_columns() {
            if values.get(&col.name).map_or(true, Value::is_null) {
                return Err(RoutingError::ShardingColumnMissing {
                    table: table.to_string(),
                    column: col.name.clone(),
                });
            }
        }
        self.match_indices(values)
    }

    fn match_indices(&self, values: &HashMap<String, Value>) -> Result<Vec<usize>, RoutingError> {
        let key = self.rule.evaluate(values, self.partition.len()).map_err(|reason| {
            RoutingError::RuleEvaluation { router: self.id.clone(), reason }
        })?;

        let indices = match &key {
            RuleKey::Index(i) => match usize::try_from(*i) {
                Ok(i) if i < self.partition.len() => vec![i],
                _ => vec![],
            },
            RuleKey::Name(name) => self
                .partition
                .iter()
                .enumerate()
                .filter(|(_, p)| p.suffix == *name || p.shard == *name)
                .map(|(i, _)| i)
                .collect(),
        };

        if indices.is_empty() {
            return Err(RoutingError::NoMatchedTarget {
                router: self.id.clone(),
                key: key.to_string(),
            });
        }
        debug!("router {} key {} matched partition {:?}", self.id, key, indices);
        Ok(indices)
    }

    fn node_at(&self, table: &str, idx: usize) -> TableNode {
        let p = &self.partition[idx];
        TableNode::new(&p.shard, table, &p.suffix)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{PartitionConfig, RuleColumnConfig, RuleConfig};

    fn router(
        partition: Vec<(&str, Vec<&str>)>,
        algorithm: Option<&str>,
        expr: Option<&str>,
    ) -> TableRouter {
        let config = TableRouterConfig {
            id: "r".into(),
            partition: partition
                .into_iter()
                .map(|(shard, suffix)| PartitionConfig {
                    shard: shard.into(),
                    suffix: suffix.into_iter().map(Into::into).collect(),
                })
                .collect(),
            rule: RuleConfig {
                columns: vec![RuleColumnConfig { name: "user_id".into(), required: true }],
                algorithm: algorithm.map(Into::into),
                expression: expr.map(Into::into),
                args: vec![],
            },
        };
        TableRouter::build(&config, &AlgorithmRegistry::default()).unwrap()
    }

    fn row(v: Value) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert("user_id".to_string(), v);
        m
    }

    #[test]
    fn test_route_point() {
        let r = router(vec![("s0", vec![]), ("s1", vec![])], None, Some("${user_id} % 2"));
        let nodes = r.route("orders", &row(Value::from(5))).unwrap();
        assert_eq!(nodes, vec![TableNode::new("s1", "orders", "")]);
        assert_eq!(nodes[0].composite_object_name(), "orders");
    }

    #[test]
    fn test_route_missing_column() {
        let r = router(vec![("s0", vec![]), ("s1", vec![])], Some("mod"), None);
        let err = r.route("orders", &row(Value::Null)).unwrap_err();
        assert_eq!(
            err,
            RoutingError::ShardingColumnMissing { table: "orders".into(), column: "user_id".into() }
        );
    }

    #[test]
    fn test_route_no_matched_target() {
        // 3 % 4 points past a two entry partition
        let r = router(vec![("s0", vec![]), ("s1", vec![])], None, Some("${user_id} % 4"));
        let err = r.route("orders", &row(Value::from(3))).unwrap_err();
        assert!(matches!(err, RoutingError::NoMatchedTarget { .. }));

        let r = router(vec![("s0", vec![]), ("s1", vec![])], None, Some("${user_id} - 10"));
        assert!(r.route("orders", &row(Value::from(3))).is_err());
    }

    #[test]
    fn test_route_by_suffix_name() {
        let r = router(
            vec![("s0", vec!["_0", "_1"]), ("s1", vec!["_2", "_3"])],
            None,
            Some("concat('_', ${user_id} % 4)"),
        );
        let nodes = r.route("orders", &row(Value::from(6))).unwrap();
        assert_eq!(nodes, vec![TableNode::new("s1", "orders", "_2")]);
        assert_eq!(nodes[0].to_string(), "s1.orders_2");
        assert_eq!(r.all_nodes("orders").len(), 4);
    }

    #[test]
    fn test_route_product_union_in_partition_order() {
        let r = router(vec![("s0", vec!["_0", "_1"]), ("s1", vec!["_2", "_3"])], Some("mod"), None);
        let nodes = r
            .route_product(
                "orders",
                &[("user_id".into(), vec![Value::from(3), Value::from(0), Value::from(4)])],
            )
            .unwrap();
        assert_eq!(
            nodes,
            vec![TableNode::new("s0", "orders", "_0"), TableNode::new("s1", "orders", "_3")]
        );

        let empty = r.route_product("orders", &[("user_id".into(), vec![])]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_build_duplicate_partition() {
        let config = TableRouterConfig {
            id: "dup".into(),
            partition: vec![
                PartitionConfig { shard: "s0".into(), suffix: vec!["_0".into()] },
                PartitionConfig { shard: "s0".into(), suffix: vec!["_0".into()] },
            ],
            rule: RuleConfig {
                columns: vec![RuleColumnConfig { name: "id".into(), required: true }],
                algorithm: Some("mod".into()),
                expression: None,
                args: vec![],
            },
        };
        assert!(TableRouter::build(&config, &AlgorithmRegistry::default()).is_err());
    }
}
