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

use indexmap::IndexMap;
use pisa_error::error::{Error, ErrorKind, RoutingError};
use tracing::debug;

use crate::{
    config::Sharding,
    prepared::{ConditionKind, IndexCondition},
    rule::{normalize_ident, AlgorithmRegistry, TableNode, TableRouter},
    value::Value,
};

pub enum RouteInput<'a> {
    // One concrete row, must resolve to exactly one target.
    Row(&'a HashMap<String, Value>),
    Conditions(&'a [IndexCondition]),
}

pub trait Route {
    type Error;

    fn dispatch(&self, table: &str, input: RouteInput<'_>) -> Result<RoutingResult, Self::Error>;
}

#[derive(Debug, Clone)]
pub enum TableKind {
    Single(String),
    Sharded(Arc<TableRouter>),
    Broadcast(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct TableMate {
    pub name: String,
    pub kind: TableKind,
}

impl TableMate {
    pub fn all_nodes(&self) -> Vec<TableNode> {
        match &self.kind {
            TableKind::Single(shard) => vec![TableNode::new(shard, &self.name, "")],
            TableKind::Sharded(router) => router.all_nodes(&self.name),
            TableKind::Broadcast(shards) => {
                shards.iter().map(|s| TableNode::new(s, &self.name, "")).collect()
            }
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.kind, TableKind::Broadcast(_))
    }
}

/// Targets a statement resolved to, in partition order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingResult {
    nodes: Vec<TableNode>,
    full_scan: bool,
    broadcast: bool,
}

impl RoutingResult {
    pub fn new(nodes: Vec<TableNode>) -> Self {
        RoutingResult { nodes, full_scan: false, broadcast: false }
    }

    /// Nodes grouped by shard, shards in first appearance order.
    pub fn matched_shards(&self) -> IndexMap<String, Vec<TableNode>> {
        let mut shards: IndexMap<String, Vec<TableNode>> = IndexMap::new();
        for node in &self.nodes {
            shards.entry(node.shard_name.clone()).or_default().push(node.clone());
        }
        shards
    }

    pub fn select_nodes(&self) -> &[TableNode] {
        &self.nodes
    }

    pub fn table_node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_full_scan(&self) -> bool {
        self.full_scan
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RoutingHandler {
    tables: HashMap<String, TableMate>,
}

fn config_error(msg: String) -> Error {
    Error::new(ErrorKind::Config(msg))
}

impl RoutingHandler {
    pub fn build(config: &Sharding, registry: &AlgorithmRegistry) -> Result<Self, Error> {
        let shards = config.shard.iter().map(|s| s.name.as_str()).collect::<HashSet<_>>();
        let check_shard = |shard: &str, owner: &str| {
            if shards.contains(shard) {
                Ok(())
            } else {
                Err(config_error(format!("{} references unknown shard {:?}", owner, shard)))
            }
        };

        let mut routers = HashMap::new();
        for rc in &config.table_router {
            let router = TableRouter::build(rc, registry)?;
            for p in &router.partition {
                check_shard(&p.shard, &format!("router {:?}", router.id))?;
            }
            if routers.insert(router.id.clone(), Arc::new(router)).is_some() {
                return Err(config_error(format!("duplicate table router {:?}", rc.id)));
            }
        }

        let mut tables = HashMap::new();
        for tc in &config.table {
            let name = normalize_ident(&tc.name);
            let owner = format!("table {:?}", name);
            let kind = match (&tc.router, &tc.broadcast, &tc.shard) {
                (Some(id), None, _) => TableKind::Sharded(
                    routers
                        .get(id)
                        .cloned()
                        .ok_or_else(|| config_error(format!("{} references unknown router {:?}", owner, id)))?,
                ),
                (None, Some(replicas), _) if !replicas.is_empty() => {
                    for s in replicas {
                        check_shard(s, &owner)?;
                    }
                    TableKind::Broadcast(replicas.clone())
                }
                (None, None, Some(shard)) => {
                    check_shard(shard, &owner)?;
                    TableKind::Single(shard.clone())
                }
                _ => {
                    return Err(config_error(format!(
                        "{} needs exactly one of router, broadcast or shard",
                        owner
                    )))
                }
            };
            if tables.insert(name.clone(), TableMate { name, kind }).is_some() {
                return Err(config_error(format!("duplicate {}", owner)));
            }
        }

        Ok(RoutingHandler { tables })
    }

    pub fn table(&self, table: &str) -> Result<&TableMate, RoutingError> {
        let name = normalize_ident(table);
        self.tables.get(&name).ok_or(RoutingError::TableNotFound(name))
    }

    /// Point route for a single row. Anything but exactly one target is an error.
    pub fn do_route_row(
        &self,
        table: &str,
        row: &HashMap<String, Value>,
    ) -> Result<RoutingResult, RoutingError> {
        let mate = self.table(table)?;
        let nodes = match &mate.kind {
            TableKind::Single(_) => mate.all_nodes(),
            TableKind::Broadcast(_) => {
                return Ok(RoutingResult { nodes: mate.all_nodes(), full_scan: false, broadcast: true })
            }
            TableKind::Sharded(router) => router.route(&mate.name, row)?,
        };

        if nodes.len() != 1 {
            return Err(RoutingError::TableRouting { table: mate.name.clone(), count: nodes.len() });
        }
        debug!("table {} row routed to {}", mate.name, nodes[0]);
        Ok(RoutingResult::new(nodes))
    }

    /// Scan route over the conditions of a WHERE clause. Falls back to every
    /// node when a required rule column is not pinned by Eq or In.
    pub fn do_route(
        &self,
        table: &str,
        conditions: &[IndexCondition],
    ) -> Result<RoutingResult, RoutingError> {
        let mate = self.table(table)?;
        let router = match &mate.kind {
            TableKind::Single(_) => return Ok(RoutingResult::new(mate.all_nodes())),
            TableKind::Broadcast(_) => {
                return Ok(RoutingResult { nodes: mate.all_nodes(), full_scan: false, broadcast: true })
            }
            TableKind::Sharded(router) => router,
        };

        let mut pinned: IndexMap<String, Vec<Value>> = IndexMap::new();
        for cond in conditions {
            let column = normalize_ident(&cond.column);
            if !router.rule.is_rule_column(&column) {
                continue;
            }
            let values = match &cond.kind {
                ConditionKind::Eq(v) => vec![v.clone()],
                ConditionKind::In(vs) => vs.clone(),
                ConditionKind::Range { .. } => continue,
            };
            let mut values = values.into_iter().filter(|v| !v.is_null()).collect::<Vec<_>>();
            dedup_values(&mut values);
            match pinned.get_mut(&column) {
                Some(existing) => existing.retain(|v| values.iter().any(|x| x.same_key(v))),
                None => {
                    pinned.insert(column, values);
                }
            }
        }

        if let Some(col) = router.rule.required_columns().find(|c| !pinned.contains_key(&c.name)) {
            debug!("table {} column {} not pinned, full scan", mate.name, col.name);
            return Ok(RoutingResult { nodes: mate.all_nodes(), full_scan: true, broadcast: false });
        }

        let candidates = pinned.into_iter().collect::<Vec<_>>();
        let nodes = router.route_product(&mate.name, &candidates)?;
        debug!("table {} routed to {} node(s)", mate.name, nodes.len());
        Ok(RoutingResult::new(nodes))
    }

    /// Rejects assignments to a sharding column, rows would end up on the
    /// wrong shard.
    pub fn check_update_columns(&self, table: &str, columns: &[String]) -> Result<(), RoutingError> {
        let mate = self.table(table)?;
        if let TableKind::Sharded(router) = &mate.kind {
            if let Some(col) = columns.iter().find(|c| router.rule.is_rule_column(c)) {
                return Err(RoutingError::ShardingColumnNotUpdatable {
                    table: mate.name.clone(),
                    column: normalize_ident(col),
                });
            }
        }
        Ok(())
    }
}

impl Route for RoutingHandler {
    type Error = RoutingError;

    fn dispatch(&self, table: &str, input: RouteInput<'_>) -> Result<RoutingResult, Self::Error> {
        match input {
            RouteInput::Row(row) => self.do_route_row(table, row),
            RouteInput::Conditions(conditions) => self.do_route(table, conditions),
        }
    }
}

fn dedup_values(values: &mut Vec<Value>) {
    let mut i = 0;
    while i < values.len() {
        if values[..i].iter().any(|v| v.same_key(&values[i])) {
            values.remove(i);
        } else {
            i += 1;
        }
    }
}
