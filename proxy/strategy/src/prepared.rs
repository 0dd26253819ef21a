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

//! The narrow view of a parsed statement the router consumes. Parsing and
//! expression evaluation happen upstream; clause texts arrive here already
//! rendered with `?` placeholders plus their bound values.

use std::collections::HashMap;

use crate::{rule::normalize_ident, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
}

impl StatementKind {
    pub fn is_query(&self) -> bool {
        matches!(self, StatementKind::Select)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Merge => "merge",
        }
    }
}

/// One cell of an INSERT/MERGE row or an UPDATE assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Default,
    Value(Value),
}

impl Expr {
    pub fn value(v: impl Into<Value>) -> Self {
        Expr::Value(v.into())
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Value(v)
    }
}

/// Clause copied verbatim into every fragment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlText {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlText {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        SqlText { sql: sql.into(), params }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    Eq(Value),
    In(Vec<Value>),
    Range { low: Option<Value>, high: Option<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexCondition {
    pub column: String,
    pub kind: ConditionKind,
}

impl IndexCondition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        IndexCondition { column: column.into(), kind: ConditionKind::Eq(value.into()) }
    }

    pub fn in_list<V: Into<Value>>(column: impl Into<String>, values: Vec<V>) -> Self {
        IndexCondition {
            column: column.into(),
            kind: ConditionKind::In(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn range(column: impl Into<String>, low: Option<Value>, high: Option<Value>) -> Self {
        IndexCondition { column: column.into(), kind: ConditionKind::Range { low, high } }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub kind: StatementKind,
    // Original statement text, only used for diagnostics
    pub sql: String,
    pub table: String,
    pub alias: Option<String>,
    // INSERT/MERGE target columns, UPDATE assigned columns
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
    pub key_columns: Vec<String>,
    pub select_list: Option<String>,
    pub condition: Option<SqlText>,
    pub order_by: Option<String>,
    pub limit: Option<SqlText>,
    pub index_conditions: Vec<IndexCondition>,
}

impl Prepared {
    fn new(kind: StatementKind, table: impl Into<String>) -> Self {
        Prepared {
            kind,
            sql: String::new(),
            table: table.into(),
            alias: None,
            columns: vec![],
            rows: vec![],
            key_columns: vec![],
            select_list: None,
            condition: None,
            order_by: None,
            limit: None,
            index_conditions: vec![],
        }
    }

    pub fn select(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Select, table)
    }

    pub fn insert<S: Into<String>>(table: impl Into<String>, columns: Vec<S>) -> Self {
        let mut p = Self::new(StatementKind::Insert, table);
        p.columns = columns.into_iter().map(Into::into).collect();
        p
    }

    pub fn merge<S: Into<String>>(
        table: impl Into<String>,
        columns: Vec<S>,
        key_columns: Vec<S>,
    ) -> Self {
        let mut p = Self::new(StatementKind::Merge, table);
        p.columns = columns.into_iter().map(Into::into).collect();
        p.key_columns = key_columns.into_iter().map(Into::into).collect();
        p
    }

    pub fn update<S: Into<String>>(
        table: impl Into<String>,
        columns: Vec<S>,
        values: Vec<Expr>,
    ) -> Self {
        let mut p = Self::new(StatementKind::Update, table);
        p.columns = columns.into_iter().map(Into::into).collect();
        p.rows = vec![values];
        p
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(StatementKind::Delete, table)
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn row(mut self, row: Vec<Expr>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn select_list(mut self, list: impl Into<String>) -> Self {
        self.select_list = Some(list.into());
        self
    }

    pub fn condition(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.condition = Some(SqlText::new(sql, params));
        self
    }

    pub fn index_condition(mut self, cond: IndexCondition) -> Self {
        self.index_conditions.push(cond);
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn limit(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.limit = Some(SqlText::new(sql, params));
        self
    }

    /// Appends the WHERE parameters, then the LIMIT parameters.
    pub fn export_parameters(&self, params: &mut Vec<Value>) {
        if let Some(cond) = &self.condition {
            params.extend(cond.params.iter().cloned());
        }
        self.export_limit_parameters(params);
    }

    pub fn export_condition_parameters(&self, params: &mut Vec<Value>) {
        if let Some(cond) = &self.condition {
            params.extend(cond.params.iter().cloned());
        }
    }

    pub fn export_limit_parameters(&self, params: &mut Vec<Value>) {
        if let Some(limit) = &self.limit {
            params.extend(limit.params.iter().cloned());
        }
    }

    /// Column -> value view of one row, used for routing. `DEFAULT` and
    /// `NULL` cells leave the column unbound.
    pub fn row_values(&self, idx: usize) -> HashMap<String, Value> {
        let mut values = HashMap::new();
        if let Some(row) = self.rows.get(idx) {
            for (col, expr) in self.columns.iter().zip(row.iter()) {
                if let Expr::Value(v) = expr {
                    if !v.is_null() {
                        values.insert(normalize_ident(col), v.clone());
                    }
                }
            }
        }
        values
    }

    pub fn display_sql(&self) -> String {
        if self.sql.is_empty() {
            format!("{} {}", self.kind.as_str(), self.table)
        } else {
            self.sql.clone()
        }
    }
}
