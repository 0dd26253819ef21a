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

pub mod algorithm;
pub mod expression;
pub mod table_router;

use std::{collections::HashMap, fmt};

use pisa_error::error::{Error, ErrorKind};
use regex::Regex;

pub use self::{
    algorithm::{AlgorithmContext, AlgorithmFn, AlgorithmRegistry},
    expression::{Expression, Scalar},
    table_router::{PartitionEntry, TableNode, TableRouter},
};
use crate::{config::RuleConfig, value::Value};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap();
}

/// Lower case identifier with quoting removed: `` `User_Id` `` -> `user_id`.
pub fn normalize_ident(ident: &str) -> String {
    ident
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '[' || c == ']')
        .to_ascii_lowercase()
}

/// Partition discriminant produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKey {
    Index(i64),
    Name(String),
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKey::Index(i) => write!(f, "{}", i),
            RuleKey::Name(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleColumn {
    pub name: String,
    pub required: bool,
}

#[derive(Clone)]
enum RuleKind {
    Algorithm { name: String, func: AlgorithmFn, args: Vec<i64> },
    Expression(Expression),
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Algorithm { name, args, .. } => {
                f.debug_struct("Algorithm").field("name", name).field("args", args).finish()
            }
            RuleKind::Expression(expr) => f.debug_tuple("Expression").field(&expr.source()).finish(),
        }
    }
}

/// Rule bound to a table router: either a named algorithm applied to the rule
/// columns or an expression over `${column}` placeholders.
#[derive(Debug, Clone)]
pub struct RuleExpression {
    columns: Vec<RuleColumn>,
    kind: RuleKind,
}

fn config_error(msg: String) -> Error {
    Error::new(ErrorKind::Config(msg))
}

impl RuleExpression {
    pub fn build(config: &RuleConfig, registry: &AlgorithmRegistry) -> Result<Self, Error> {
        let columns = config
            .columns
            .iter()
            .map(|c| RuleColumn { name: normalize_ident(&c.name), required: c.required })
            .collect::<Vec<_>>();
        if columns.is_empty() {
            return Err(config_error("rule declares no columns".to_string()));
        }

        let kind = match (&config.algorithm, &config.expression) {
            (Some(name), None) => {
                let func = registry
                    .get(name)
                    .ok_or_else(|| config_error(format!("unknown algorithm {:?}", name)))?;
                RuleKind::Algorithm { name: name.clone(), func, args: config.args.clone() }
            }
            (None, Some(src)) => {
                for cap in PLACEHOLDER_RE.captures_iter(src) {
                    let name = normalize_ident(&cap[1]);
                    if !columns.iter().any(|c| c.name == name) {
                        return Err(config_error(format!(
                            "placeholder ${{{}}} is not a declared rule column",
                            name
                        )));
                    }
                }
                let expr = Expression::parse(src)
                    .map_err(|e| config_error(format!("rule expression {:?}: {}", src, e)))?;
                RuleKind::Expression(expr)
            }
            _ => {
                return Err(config_error(
                    "rule needs exactly one of algorithm or expression".to_string(),
                ))
            }
        };

        Ok(RuleExpression { columns, kind })
    }

    pub fn columns(&self) -> &[RuleColumn] {
        &self.columns
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &RuleColumn> {
        self.columns.iter().filter(|c| c.required)
    }

    pub fn is_rule_column(&self, name: &str) -> bool {
        let name = normalize_ident(name);
        self.columns.iter().any(|c| c.name == name)
    }

    /// Evaluates the rule against normalized column names. Presence of the
    /// required columns is checked by the caller.
    pub fn evaluate(
        &self,
        values: &HashMap<String, Value>,
        partition_count: usize,
    ) -> Result<RuleKey, String> {
        match &self.kind {
            RuleKind::Algorithm { func, args, .. } => {
                let ordered = self
                    .columns
                    .iter()
                    .map(|c| values.get(&c.name).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>();
                func(&ordered, &AlgorithmContext { partition_count, args })
            }
            RuleKind::Expression(expr) => match expr.eval(values)? {
                Scalar::Int(i) => Ok(RuleKey::Index(i)),
                Scalar::Str(s) => Ok(RuleKey::Name(s)),
                Scalar::Null => Err("rule evaluated to NULL".to_string()),
            },
        }
    }
}
