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

use std::{error::Error as StdError, fmt, io::Error as IoError};

use thiserror::Error as ThisError;

/// Vendor error reported by a physical connection. `code` is the vendor
/// error number (MySQL errno, Oracle ORA-nnnnn, DB2 SQLCODE).
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("[{code}] {message} (sqlstate: {sql_state:?})")]
pub struct SqlError {
    pub code: i32,
    pub sql_state: Option<String>,
    pub message: String,
}

impl SqlError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        SqlError { code, sql_state: None, message: message.into() }
    }

    pub fn with_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum RoutingError {
    #[error("table {0:?} is not defined")]
    TableNotFound(String),

    #[error("sharding column {column:?} of table {table:?} is missing")]
    ShardingColumnMissing { table: String, column: String },

    #[error("sharding column {column:?} of table {table:?} can not be updated")]
    ShardingColumnNotUpdatable { table: String, column: String },

    #[error("table {table:?} routing expected one target, found {count}")]
    TableRouting { table: String, count: usize },

    #[error("rule {router:?} produced key {key:?} matching no partition")]
    NoMatchedTarget { router: String, key: String },

    #[error("rule {router:?} evaluation error: {reason}")]
    RuleEvaluation { router: String, reason: String },

    #[error("column count mismatch, expected {expected}, found {found}")]
    ColumnCountMismatch { expected: usize, found: usize },
}

#[derive(Debug, ThisError)]
pub enum ErrorKind {
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("shard {shard:?} execute {sql:?} error: {source}")]
    Fragment { shard: String, sql: String, source: SqlError },

    #[error("statement cancelled after {0} ms timeout")]
    Timeout(u64),

    #[error("no available datasource for shard {0:?}")]
    Unavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("runtime error: {0:?}")]
    Runtime(#[from] Box<dyn StdError + Send + Sync>),

    #[error("stdio error: {0:?}")]
    Io(#[from] IoError),
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    sql: Option<String>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{}, sql: {}", self.kind, sql),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.kind.source()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<RoutingError> for Error {
    fn from(err: RoutingError) -> Self {
        Error::new(ErrorKind::Routing(err))
    }
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, sql: None }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    // Attach the logical statement, keeps the innermost one if already set.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Error {
        if self.sql.is_none() {
            self.sql = Some(sql.into());
        }
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.kind, ErrorKind::Unavailable(_))
    }

    pub fn is_routing(&self) -> bool {
        matches!(self.kind, ErrorKind::Routing(_))
    }
}
