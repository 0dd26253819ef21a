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

use std::{collections::VecDeque, vec};

use strategy::datasource::{ResultSet, Row};

/// Concatenates per shard results: every row of cursor i comes before any
/// row of cursor i + 1. No ordering is applied across shards.
#[derive(Debug)]
pub struct MergedCursor {
    columns: Vec<String>,
    cursors: VecDeque<vec::IntoIter<Row>>,
    max_rows: usize,
    fetched: usize,
}

impl MergedCursor {
    /// `max_rows` of 0 means unlimited.
    pub fn new(results: Vec<ResultSet>, max_rows: usize) -> Self {
        let columns = results
            .iter()
            .find(|rs| !rs.columns.is_empty())
            .map(|rs| rs.columns.clone())
            .unwrap_or_default();
        MergedCursor {
            columns,
            cursors: results.into_iter().map(|rs| rs.rows.into_iter()).collect(),
            max_rows,
            fetched: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn fetched(&self) -> usize {
        self.fetched
    }
}

impl Iterator for MergedCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.max_rows != 0 && self.fetched >= self.max_rows {
            return None;
        }
        while let Some(cursor) = self.cursors.front_mut() {
            match cursor.next() {
                Some(row) => {
                    self.fetched += 1;
                    return Some(row);
                }
                None => {
                    self.cursors.pop_front();
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use strategy::value::Value;

    use super::*;

    fn rs(ids: &[i64]) -> ResultSet {
        ResultSet::new(vec!["id".into()], ids.iter().map(|i| vec![Value::from(*i)]).collect())
    }

    #[test]
    fn test_merged_cursor_concatenates_in_order() {
        let cursor = MergedCursor::new(vec![rs(&[3, 1]), rs(&[]), rs(&[2])], 0);
        assert_eq!(cursor.columns(), &["id".to_string()]);
        let ids = cursor.map(|r| r[0].as_i64().unwrap()).collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_merged_cursor_max_rows() {
        let mut cursor = MergedCursor::new(vec![rs(&[1]), rs(&[2, 3])], 2);
        assert_eq!(cursor.by_ref().count(), 2);
        assert_eq!(cursor.fetched(), 2);
        assert!(cursor.next().is_none());

        let mut empty = MergedCursor::new(vec![], 0);
        assert!(empty.columns().is_empty());
        assert!(empty.next().is_none());
    }
}
