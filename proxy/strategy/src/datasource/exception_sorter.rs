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

use pisa_error::error::SqlError;
use serde::{Deserialize, Serialize};

/// Decides whether a vendor error means the datasource itself is broken, as
/// opposed to a statement level failure.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionSorter {
    #[serde(rename = "mysql")]
    MySql,
    Oracle,
    Db2,
    Null,
}

impl Default for ExceptionSorter {
    fn default() -> Self {
        ExceptionSorter::Null
    }
}

// Server side errors that leave the connection unusable
const MYSQL_FATAL_CODES: &[i32] = &[
    1004, 1005, 1015, 1021, 1037, 1038, 1040, 1041, 1042, 1043, 1044, 1045, 1047, 1053, 1077,
    1078, 1079, 1080, 1081, 1129, 1130, 1133, 1135, 1152, 1153, 1154, 1155, 1156, 1157, 1158,
    1159, 1160, 1161, 1184, 1189, 1190, 1218, 1312, 1314, 1335, 1336, 1379, 1380, 1381, 1382,
];

const ORACLE_FATAL_CODES: &[i32] = &[
    28, 600, 1012, 1014, 1033, 1034, 1035, 1089, 1090, 1092, 1094, 2396, 3106, 3111, 3113, 3114,
    3134, 3135, 3136, 3138, 3142, 3143, 3144, 3145, 3149, 6802, 6803, 6804, 6805, 9918, 9920,
    9921, 17002, 17008, 17410, 17401,
];

const DB2_FATAL_CODES: &[i32] =
    &[-512, -514, -516, -518, -525, -909, -918, -924, -1032, -1224, -4470, -4499, -30081, -30108];

impl ExceptionSorter {
    pub fn is_exception_fatal(&self, err: &SqlError) -> bool {
        if let ExceptionSorter::Null = self {
            return false;
        }

        // SQLSTATE class 08: connection exception
        if err.sql_state.as_deref().map_or(false, |s| s.starts_with("08")) {
            return true;
        }

        match self {
            ExceptionSorter::MySql => {
                // 2000..2999 are client side errors, all connection related
                (2000..=2999).contains(&err.code) || MYSQL_FATAL_CODES.contains(&err.code)
            }
            ExceptionSorter::Oracle => {
                ORACLE_FATAL_CODES.contains(&err.code.abs())
                    || (12100..=12299).contains(&err.code.abs())
                    || (12500..=12599).contains(&err.code.abs())
            }
            ExceptionSorter::Db2 => DB2_FATAL_CODES.contains(&err.code),
            ExceptionSorter::Null => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mysql_sorter() {
        let sorter = ExceptionSorter::MySql;
        assert!(sorter.is_exception_fatal(&SqlError::new(2013, "Lost connection")));
        assert!(sorter.is_exception_fatal(&SqlError::new(1040, "Too many connections")));
        assert!(!sorter.is_exception_fatal(&SqlError::new(1062, "Duplicate entry").with_state("23000")));
        assert!(sorter.is_exception_fatal(&SqlError::new(9999, "link failure").with_state("08S01")));
    }

    #[test]
    fn test_oracle_and_db2_sorter() {
        assert!(ExceptionSorter::Oracle.is_exception_fatal(&SqlError::new(3113, "end-of-file on channel")));
        assert!(ExceptionSorter::Oracle.is_exception_fatal(&SqlError::new(12541, "no listener")));
        assert!(!ExceptionSorter::Oracle.is_exception_fatal(&SqlError::new(1, "unique constraint")));
        assert!(ExceptionSorter::Db2.is_exception_fatal(&SqlError::new(-30081, "communication error")));
        assert!(!ExceptionSorter::Db2.is_exception_fatal(&SqlError::new(-803, "duplicate key")));
    }

    #[test]
    fn test_null_sorter_never_fatal() {
        let err = SqlError::new(2013, "Lost connection").with_state("08S01");
        assert!(!ExceptionSorter::Null.is_exception_fatal(&err));
        assert_eq!(ExceptionSorter::default(), ExceptionSorter::Null);
    }
}
