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

pub const INSERT_INTO: &str = "INSERT INTO";
pub const MERGE_INTO: &str = "MERGE INTO";
pub const KEY: &str = "KEY";
pub const VALUES: &str = "VALUES";
pub const UPDATE: &str = "UPDATE";
pub const SET: &str = "SET";
pub const DELETE_FROM: &str = "DELETE FROM";
pub const SELECT: &str = "SELECT";
pub const FROM: &str = "FROM";
pub const WHERE: &str = "WHERE";
pub const ORDER_BY: &str = "ORDER BY";
pub const LIMIT: &str = "LIMIT";
pub const UNION_ALL: &str = "UNION ALL";
pub const DEFAULT: &str = "DEFAULT";
pub const NULL: &str = "NULL";
pub const PLACEHOLDER: &str = "?";
pub const STAR: &str = "*";
