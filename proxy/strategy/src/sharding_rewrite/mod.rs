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

//! Turns one logical statement into shard local fragments: SQL text using
//! the physical table name plus its positional parameters.

pub mod rewrite_const;

use std::{fmt, sync::Arc};

use itertools::Itertools;
use pisa_error::error::{Error, RoutingError};
use rand::seq::SliceRandom;
use tracing::debug;

use self::rewrite_const::*;
use crate::{
    prepared::{Expr, Prepared, StatementKind},
    route::{RoutingHandler, RoutingResult},
    rule::TableNode,
    value::Value,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub shard_name: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub nodes: Vec<TableNode>,
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.shard_name, self.sql)?;
        if !self.params.is_empty() {
            write!(f, " -- ({})", self.params.iter().join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewritePlan {
    pub kind: StatementKind,
    pub fragments: Vec<Fragment>,
    // Writes hit every replica of a broadcast table
    pub broadcast: bool,
}

impl RewritePlan {
    pub fn shard_count(&self) -> usize {
        self.fragments.iter().map(|f| f.shard_name.as_str()).unique().count()
    }
}

#[derive(Debug, Clone)]
pub struct ShardingRewrite {
    handler: Arc<RoutingHandler>,
}

impl ShardingRewrite {
    pub fn new(handler: Arc<RoutingHandler>) -> Self {
        ShardingRewrite { handler }
    }

    pub fn handler(&self) -> &RoutingHandler {
        &self.handler
    }

    /// Routes and renders `prepared`. Routing errors carry the original SQL.
    pub fn plan(&self, prepared: &Prepared) -> Result<RewritePlan, Error> {
        self.do_plan(prepared).map_err(|e| Error::from(e).with_sql(prepared.display_sql()))
    }

    fn do_plan(&self, prepared: &Prepared) -> Result<RewritePlan, RoutingError> {
        check_column_count(prepared)?;

        let mut broadcast = false;
        let fragments = match prepared.kind {
            StatementKind::Insert | StatementKind::Merge => {
                let mut fragments = vec![];
                for idx in 0..prepared.rows.len() {
                    let res = self.handler.do_route_row(&prepared.table, &prepared.row_values(idx))?;
                    broadcast |= res.is_broadcast();
                    for node in res.select_nodes() {
                        fragments.push(do_translate_insert(node, prepared, idx));
                    }
                }
                fragments
            }
            StatementKind::Update => {
                self.handler.check_update_columns(&prepared.table, &prepared.columns)?;
                let res = self.handler.do_route(&prepared.table, &prepared.index_conditions)?;
                broadcast = res.is_broadcast();
                res.select_nodes().iter().map(|n| do_translate_update(n, prepared)).collect()
            }
            StatementKind::Delete => {
                let res = self.handler.do_route(&prepared.table, &prepared.index_conditions)?;
                broadcast = res.is_broadcast();
                res.select_nodes().iter().map(|n| do_translate_delete(n, prepared)).collect()
            }
            StatementKind::Select => {
                let res = self.handler.do_route(&prepared.table, &prepared.index_conditions)?;
                do_translate_select(&pick_replica(res), prepared)
            }
        };

        for f in &fragments {
            debug!("fragment {}", f);
        }
        Ok(RewritePlan { kind: prepared.kind, fragments, broadcast })
    }
}

// Reads of a broadcast table only need one copy.
fn pick_replica(res: RoutingResult) -> RoutingResult {
    if !res.is_broadcast() {
        return res;
    }
    match res.select_nodes().choose(&mut rand::thread_rng()) {
        Some(node) => RoutingResult::new(vec![node.clone()]),
        None => res,
    }
}

fn check_column_count(prepared: &Prepared) -> Result<(), RoutingError> {
    let expected = prepared.columns.len();
    let rows: &[Vec<Expr>] = match prepared.kind {
        StatementKind::Insert | StatementKind::Merge | StatementKind::Update => &prepared.rows,
        _ => return Ok(()),
    };
    if expected == 0 {
        return Err(RoutingError::ColumnCountMismatch { expected, found: 0 });
    }
    match rows.iter().find(|r| r.len() != expected) {
        Some(r) => Err(RoutingError::ColumnCountMismatch { expected, found: r.len() }),
        None => Ok(()),
    }
}

// `?` for bound values, DEFAULT and NULL are written inline.
fn render_cell(expr: &Expr, params: &mut Vec<Value>) -> &'static str {
    match expr {
        Expr::Default => DEFAULT,
        Expr::Value(Value::Null) => NULL,
        Expr::Value(v) => {
            params.push(v.clone());
            PLACEHOLDER
        }
    }
}

fn table_ref(node: &TableNode, prepared: &Prepared) -> String {
    match &prepared.alias {
        Some(alias) => format!("{} {}", node.composite_object_name(), alias),
        None => node.composite_object_name(),
    }
}

fn push_where(sql: &mut String, prepared: &Prepared) {
    if let Some(cond) = &prepared.condition {
        sql.push_str(&format!(" {} {}", WHERE, cond.sql));
    }
}

fn push_order_limit(sql: &mut String, prepared: &Prepared) {
    if let Some(order_by) = &prepared.order_by {
        sql.push_str(&format!(" {} {}", ORDER_BY, order_by));
    }
    if let Some(limit) = &prepared.limit {
        sql.push_str(&format!(" {} {}", LIMIT, limit.sql));
    }
}

fn fragment(node: &TableNode, sql: String, params: Vec<Value>) -> Fragment {
    Fragment { shard_name: node.shard_name.clone(), sql, params, nodes: vec![node.clone()] }
}

pub fn do_translate_insert(node: &TableNode, prepared: &Prepared, row_idx: usize) -> Fragment {
    let mut params = vec![];
    let cells = prepared.rows[row_idx].iter().map(|e| render_cell(e, &mut params)).join(", ");
    let columns = prepared.columns.join(", ");
    let sql = match prepared.kind {
        StatementKind::Merge if !prepared.key_columns.is_empty() => format!(
            "{} {} ({}) {} ({}) {} ({})",
            MERGE_INTO,
            node.composite_object_name(),
            columns,
            KEY,
            prepared.key_columns.join(", "),
            VALUES,
            cells
        ),
        StatementKind::Merge => format!(
            "{} {} ({}) {} ({})",
            MERGE_INTO,
            node.composite_object_name(),
            columns,
            VALUES,
            cells
        ),
        _ => format!(
            "{} {} ({}) {} ({})",
            INSERT_INTO,
            node.composite_object_name(),
            columns,
            VALUES,
            cells
        ),
    };
    fragment(node, sql, params)
}

pub fn do_translate_update(node: &TableNode, prepared: &Prepared) -> Fragment {
    let mut params = vec![];
    let assignments = match prepared.rows.first() {
        Some(row) => prepared
            .columns
            .iter()
            .zip(row.iter())
            .map(|(c, e)| format!("{} = {}", c, render_cell(e, &mut params)))
            .join(", "),
        None => String::new(),
    };
    let mut sql = format!("{} {} {} {}", UPDATE, table_ref(node, prepared), SET, assignments);
    push_where(&mut sql, prepared);
    if let Some(limit) = &prepared.limit {
        sql.push_str(&format!(" {} {}", LIMIT, limit.sql));
    }
    prepared.export_parameters(&mut params);
    fragment(node, sql, params)
}

pub fn do_translate_delete(node: &TableNode, prepared: &Prepared) -> Fragment {
    let mut params = vec![];
    let mut sql = format!("{} {}", DELETE_FROM, table_ref(node, prepared));
    push_where(&mut sql, prepared);
    if let Some(limit) = &prepared.limit {
        sql.push_str(&format!(" {} {}", LIMIT, limit.sql));
    }
    prepared.export_parameters(&mut params);
    fragment(node, sql, params)
}

/// One fragment per shard. Several tables in the same shard are read in one
/// round trip through a `UNION ALL` derived table.
pub fn do_translate_select(res: &RoutingResult, prepared: &Prepared) -> Vec<Fragment> {
    let select_list = prepared.select_list.as_deref().unwrap_or(STAR);
    let mut fragments = vec![];

    for (shard, nodes) in res.matched_shards() {
        let mut params = vec![];
        let branch = |node: &TableNode, params: &mut Vec<Value>| {
            let mut sql = format!("{} {} {} {}", SELECT, select_list, FROM, table_ref(node, prepared));
            push_where(&mut sql, prepared);
            prepared.export_condition_parameters(params);
            sql
        };

        let sql = if nodes.len() == 1 {
            let mut sql = branch(&nodes[0], &mut params);
            push_order_limit(&mut sql, prepared);
            sql
        } else {
            let branches = nodes.iter().map(|n| branch(n, &mut params)).collect::<Vec<_>>();
            let alias = prepared.alias.clone().unwrap_or_else(|| prepared.table.clone());
            let separator = format!(" {} ", UNION_ALL);
            let mut sql = format!(
                "{} {} {} ({}) {}",
                SELECT,
                STAR,
                FROM,
                branches.join(separator.as_str()),
                alias
            );
            push_order_limit(&mut sql, prepared);
            sql
        };
        prepared.export_limit_parameters(&mut params);
        fragments.push(Fragment { shard_name: shard, sql, params, nodes });
    }
    fragments
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{prepared::IndexCondition, route::test::handler};

    fn rewrite() -> ShardingRewrite {
        ShardingRewrite::new(Arc::new(handler()))
    }

    #[test]
    fn test_insert_point_route() {
        let p = Prepared::insert("orders", vec!["user_id", "amt"])
            .row(vec![Expr::value(5), Expr::value(10)])
            .row(vec![Expr::value(4), Expr::Default])
            .row(vec![Expr::value(7), Expr::Value(Value::Null)]);
        let plan = rewrite().plan(&p).unwrap();

        assert_eq!(plan.fragments.len(), 3);
        assert_eq!(plan.shard_count(), 2);
        assert!(!plan.broadcast);
        let f = &plan.fragments[0];
        assert_eq!(f.shard_name, "s1");
        assert_eq!(f.sql, "INSERT INTO orders (user_id, amt) VALUES (?, ?)");
        assert_eq!(f.params, vec![Value::from(5), Value::from(10)]);
        assert_eq!(plan.fragments[1].sql, "INSERT INTO orders (user_id, amt) VALUES (?, DEFAULT)");
        assert_eq!(plan.fragments[1].shard_name, "s0");
        assert_eq!(plan.fragments[2].sql, "INSERT INTO orders (user_id, amt) VALUES (?, NULL)");
        assert_eq!(plan.fragments[2].params, vec![Value::from(7)]);
    }

    #[test]
    fn test_insert_errors_carry_sql() {
        let p = Prepared::insert("orders", vec!["user_id", "amt"])
            .with_sql("INSERT INTO orders VALUES (1)")
            .row(vec![Expr::value(1)]);
        let err = rewrite().plan(&p).unwrap_err();
        assert_eq!(err.sql(), Some("INSERT INTO orders VALUES (1)"));
        assert!(err.is_routing());

        let p = Prepared::insert("orders", vec!["amt"]).row(vec![Expr::value(1)]);
        let err = rewrite().plan(&p).unwrap_err();
        assert!(err.to_string().contains("user_id"));
    }

    #[test]
    fn test_merge() {
        let p = Prepared::merge("items", vec!["order_id", "qty"], vec!["order_id"])
            .row(vec![Expr::value(6), Expr::value(1)]);
        let plan = rewrite().plan(&p).unwrap();
        assert_eq!(plan.fragments[0].sql, "MERGE INTO items_2 (order_id, qty) KEY (order_id) VALUES (?, ?)");
        assert_eq!(plan.fragments[0].shard_name, "s1");
    }

    #[test]
    fn test_update_and_delete() {
        let p = Prepared::update("orders", vec!["amt"], vec![Expr::value(20)])
            .alias("o")
            .condition("o.user_id = ? AND o.amt < ?", vec![Value::from(5), Value::from(100)])
            .index_condition(IndexCondition::eq("user_id", 5))
            .limit("?", vec![Value::from(1)]);
        let plan = rewrite().plan(&p).unwrap();
        assert_eq!(plan.fragments.len(), 1);
        assert_eq!(plan.fragments[0].sql, "UPDATE orders o SET amt = ? WHERE o.user_id = ? AND o.amt < ? LIMIT ?");
        assert_eq!(
            plan.fragments[0].params,
            vec![Value::from(20), Value::from(5), Value::from(100), Value::from(1)]
        );

        let p = Prepared::update("orders", vec!["user_id"], vec![Expr::value(2)]);
        assert!(rewrite().plan(&p).is_err());

        let p = Prepared::delete("orders").condition("amt > ?", vec![Value::from(3)]);
        let plan = rewrite().plan(&p).unwrap();
        assert_eq!(plan.fragments.len(), 2);
        assert_eq!(plan.fragments[1].sql, "DELETE FROM orders WHERE amt > ?");
        assert_eq!(plan.fragments[1].params, vec![Value::from(3)]);
    }

    #[test]
    fn test_select_union_all_within_shard() {
        let p = Prepared::select("items")
            .condition("qty > ?", vec![Value::from(1)])
            .order_by("qty DESC")
            .limit("?", vec![Value::from(10)]);
        let plan = rewrite().plan(&p).unwrap();

        assert_eq!(plan.fragments.len(), 2);
        let f = &plan.fragments[0];
        assert_eq!(f.shard_name, "s0");
        assert_eq!(
            f.sql,
            "SELECT * FROM (SELECT * FROM items_0 WHERE qty > ? UNION ALL SELECT * FROM items_1 WHERE qty > ?) items ORDER BY qty DESC LIMIT ?"
        );
        assert_eq!(f.params, vec![Value::from(1), Value::from(1), Value::from(10)]);
        assert_eq!(f.nodes.len(), 2);
    }

    #[test]
    fn test_select_point_and_broadcast() {
        let p = Prepared::select("orders")
            .select_list("user_id, amt")
            .condition("user_id = ?", vec![Value::from(5)])
            .index_condition(IndexCondition::eq("user_id", 5));
        let plan = rewrite().plan(&p).unwrap();
        assert_eq!(plan.fragments.len(), 1);
        assert_eq!(plan.fragments[0].sql, "SELECT user_id, amt FROM orders WHERE user_id = ?");
        assert_eq!(plan.fragments[0].to_string(), "[s1] SELECT user_id, amt FROM orders WHERE user_id = ? -- (5)");

        let plan = rewrite().plan(&Prepared::select("region")).unwrap();
        assert_eq!(plan.fragments.len(), 1);
        assert!(!plan.broadcast);

        let p = Prepared::insert("region", vec!["id"]).row(vec![Expr::value(1)]);
        let plan = rewrite().plan(&p).unwrap();
        assert!(plan.broadcast);
        assert_eq!(plan.fragments.len(), 2);
    }
}
