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

mod common;

use std::{sync::atomic::Ordering, time::Duration};

use common::Cluster;
use pisa_error::error::{ErrorKind, SqlError};
use runtime_shard::Session;
use strategy::{
    config::MonitorConfig,
    monitors::{health_monitor::CheckStatus, HealthMonitor},
    prepared::{Expr, IndexCondition, Prepared},
    value::Value,
};

fn ids(cursor: runtime_shard::MergedCursor) -> Vec<i64> {
    cursor.map(|row| row[0].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn test_insert_single_row_goes_to_one_shard() {
    let cluster = Cluster::new();
    let executor = cluster.executor();

    let p = Prepared::insert("orders", vec!["user_id", "amt"])
        .row(vec![Expr::value(5), Expr::value(10)]);
    assert_eq!(executor.update(&p).await.unwrap(), 1);

    let calls = cluster.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].uid, "ds1");
    assert_eq!(calls[0].kind, "execute");
    assert_eq!(calls[0].sql, "INSERT INTO orders (user_id, amt) VALUES (?, ?)");
    assert_eq!(calls[0].params, vec![vec![Value::from(5), Value::from(10)]]);
}

#[tokio::test]
async fn test_insert_rows_grouped_into_batches() {
    let cluster = Cluster::new();
    let executor = cluster.executor();

    let p = Prepared::insert("orders", vec!["user_id", "amt"])
        .row(vec![Expr::value(1), Expr::value(10)])
        .row(vec![Expr::value(2), Expr::value(20)])
        .row(vec![Expr::value(3), Expr::value(30)])
        .row(vec![Expr::value(5), Expr::value(50)]);
    assert_eq!(executor.update(&p).await.unwrap(), 4);

    let s1 = cluster.calls_on("ds1");
    assert_eq!(s1.len(), 1);
    assert_eq!(s1[0].kind, "batch");
    assert_eq!(s1[0].params.len(), 3);
    assert_eq!(s1[0].params[2], vec![Value::from(5), Value::from(50)]);

    let s0 = cluster.calls_on("ds0");
    assert_eq!(s0.len(), 1);
    assert_eq!(s0[0].kind, "execute");
}

#[tokio::test]
async fn test_update_counts_are_summed() {
    let cluster = Cluster::new();
    let executor = cluster.executor();

    let p = Prepared::update("orders", vec!["amt"], vec![Expr::value(0)])
        .condition("amt > ?", vec![Value::from(100)]);
    assert_eq!(executor.update(&p).await.unwrap(), 2);
    assert_eq!(cluster.calls_on("ds0").len(), 1);
    assert_eq!(cluster.calls_on("ds1").len(), 1);
    assert!(cluster.calls_on("ds1r").is_empty());

    let p = Prepared::delete("orders")
        .condition("user_id = ?", vec![Value::from(4)])
        .index_condition(IndexCondition::eq("user_id", 4));
    assert_eq!(executor.update(&p).await.unwrap(), 1);
    assert_eq!(cluster.calls_on("ds0").len(), 2);
}

#[tokio::test]
async fn test_timeout_keeps_completed_writes() {
    let cluster = Cluster::new();
    cluster.state("ds1").delay_ms.store(1_000, Ordering::SeqCst);
    let executor = cluster
        .executor()
        .with_session(Session::default().query_timeout(Some(Duration::from_millis(50))));

    let p = Prepared::update("orders", vec!["amt"], vec![Expr::value(0)])
        .with_sql("UPDATE orders SET amt = 0");
    let err = executor.update(&p).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.sql(), Some("UPDATE orders SET amt = 0"));

    // s0 finished before the deadline and its write stays applied
    let s0 = cluster.calls_on("ds0");
    assert_eq!(s0.len(), 1);
    assert_eq!(s0[0].kind, "execute");
    assert!(s0[0].sql.starts_with("UPDATE orders"));
    assert!(cluster.calls_on("ds1").is_empty());
}

#[tokio::test]
async fn test_broadcast_write_counts_first_replica() {
    let cluster = Cluster::new();
    let executor = cluster.executor();

    let p = Prepared::insert("region", vec!["id", "name"])
        .row(vec![Expr::value(1), Expr::value("north")]);
    assert_eq!(executor.update(&p).await.unwrap(), 1);
    assert_eq!(cluster.calls_on("ds0").len(), 1);
    assert_eq!(cluster.calls_on("ds1").len(), 1);
}

#[tokio::test]
async fn test_query_point_and_full_scan() {
    let cluster = Cluster::new();
    cluster.state("ds0").set_rows(&[2, 4]);
    cluster.state("ds1r").set_rows(&[1, 3]);
    let executor = cluster.executor();

    let p = Prepared::select("orders")
        .condition("user_id = ?", vec![Value::from(5)])
        .index_condition(IndexCondition::eq("user_id", 5));
    assert_eq!(ids(executor.query(&p, 0).await.unwrap()), vec![1, 3]);
    assert!(cluster.calls_on("ds0").is_empty());
    // reads of s1 never reach the write only master
    assert!(cluster.calls_on("ds1").is_empty());

    let p = Prepared::select("orders");
    assert_eq!(ids(executor.query(&p, 0).await.unwrap()), vec![2, 4, 1, 3]);

    let mut cursor = executor.query(&p, 3).await.unwrap();
    assert_eq!(cursor.columns(), &["user_id".to_string()]);
    assert_eq!(cursor.next(), Some(vec![Value::from(2)]));
    assert_eq!(ids(cursor), vec![4, 1]);

    let p = Prepared::select("orders").index_condition(IndexCondition::in_list("user_id", vec![2, 6]));
    assert_eq!(ids(executor.query(&p, 0).await.unwrap()), vec![2, 4]);
}

#[tokio::test]
async fn test_statement_kind_mismatch() {
    let cluster = Cluster::new();
    let executor = cluster.executor();

    assert!(executor.update(&Prepared::select("orders")).await.is_err());
    assert!(executor.query(&Prepared::delete("orders"), 0).await.is_err());
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_explain_does_not_execute() {
    let cluster = Cluster::new();
    let executor = cluster.executor();

    let plan = executor.explain(&Prepared::delete("orders")).unwrap();
    assert_eq!(plan.fragments.len(), 2);
    assert_eq!(plan.fragments[0].to_string(), "[s0] DELETE FROM orders");
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_timeout_cancels_statement() {
    let cluster = Cluster::new();
    cluster.state("ds1r").delay_ms.store(1_000, Ordering::SeqCst);
    let executor = cluster
        .executor()
        .with_session(Session::default().query_timeout(Some(Duration::from_millis(50))));

    let p = Prepared::select("orders").with_sql("SELECT * FROM orders");
    let err = executor.query(&p, 0).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err.kind(), ErrorKind::Timeout(50)));
    assert_eq!(err.sql(), Some("SELECT * FROM orders"));

    let p = Prepared::select("orders").index_condition(IndexCondition::eq("user_id", 1));
    assert!(executor.query(&p, 0).await.unwrap_err().is_timeout());

    // the fast shard completed and its result is not rolled back
    let p = Prepared::select("orders").index_condition(IndexCondition::eq("user_id", 2));
    assert!(executor.query(&p, 0).await.is_ok());
    assert_eq!(cluster.calls_on("ds0").len(), 2);
}

#[tokio::test]
async fn test_fragment_error_carries_shard_and_sql() {
    let cluster = Cluster::new();
    cluster.state("ds0").fail_with(Some(SqlError::new(1146, "Table 'orders' doesn't exist")));
    let executor = cluster.executor();

    let p = Prepared::delete("orders").with_sql("DELETE FROM orders");
    let err = executor.update(&p).await.unwrap_err();
    assert_eq!(err.sql(), Some("DELETE FROM orders"));
    match err.kind() {
        ErrorKind::Fragment { shard, source, .. } => {
            assert_eq!(shard, "s0");
            assert_eq!(source.code, 1146);
        }
        kind => panic!("unexpected error {:?}", kind),
    }

    // not fatal for mysql, datasource is not reported
    assert!(cluster.repository.failure_reports().try_recv().is_err());
    assert_eq!(cluster.repository.datasource("ds0").unwrap().failed_count(), 0);
}

#[tokio::test]
async fn test_fatal_error_failover_and_recovery() {
    let cluster = Cluster::new();
    cluster.state("ds1r").set_rows(&[7]);
    let executor = cluster.executor();
    let mut monitor = HealthMonitor::new(cluster.repository.clone(), &MonitorConfig::default());

    let p = Prepared::select("orders").index_condition(IndexCondition::eq("user_id", 7));
    assert_eq!(ids(executor.query(&p, 0).await.unwrap()), vec![7]);

    let state = cluster.state("ds1r");
    state.fail_with(Some(SqlError::new(2013, "Lost connection to MySQL server during query")));
    state.down.store(true, Ordering::SeqCst);
    assert!(executor.query(&p, 0).await.is_err());

    let checked = monitor.check_once().await;
    assert_eq!(checked.len(), 1);
    assert_eq!(checked[0].0, "ds1r");
    assert!(matches!(checked[0].1, CheckStatus::Failed(_)));

    let err = executor.query(&p, 0).await.unwrap_err();
    assert!(err.is_unavailable());
    // writes to the master are unaffected
    let p_write = Prepared::delete("orders").index_condition(IndexCondition::eq("user_id", 7));
    assert_eq!(executor.update(&p_write).await.unwrap(), 1);

    state.fail_with(None);
    state.down.store(false, Ordering::SeqCst);
    let checked = monitor.check_once().await;
    assert_eq!(checked[0].1, CheckStatus::Recovered);
    assert!(monitor.suspects().is_empty());
    assert_eq!(ids(executor.query(&p, 0).await.unwrap()), vec![7]);
}

#[tokio::test]
async fn test_unavailable_shard_keeps_statement_sql() {
    let cluster = Cluster::new();
    let executor = cluster.executor().with_session(Session::default().retry(1));
    cluster.state("ds0").down.store(true, Ordering::SeqCst);

    let p = Prepared::delete("orders")
        .condition("user_id = ?", vec![Value::from(2)])
        .index_condition(IndexCondition::eq("user_id", 2))
        .with_sql("DELETE FROM orders WHERE user_id = 2");
    let err = executor.update(&p).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(err.sql(), Some("DELETE FROM orders WHERE user_id = 2"));
    assert_eq!(cluster.repository.failure_reports().try_recv().unwrap(), "ds0");
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_connection_failure_retries_next_member() {
    let cluster = Cluster::new();
    let executor = cluster.executor().with_session(Session::default().retry(1));
    cluster.state("ds2a").down.store(true, Ordering::SeqCst);

    let p = Prepared::delete("audit");
    for _ in 0..20 {
        assert_eq!(executor.update(&p).await.unwrap(), 1);
    }
    assert!(cluster.calls_on("ds2a").is_empty());
    assert_eq!(cluster.calls_on("ds2b").len(), 20);
    assert_eq!(cluster.repository.failure_reports().try_recv().unwrap(), "ds2a");

    // without retries a pick of the broken member is not recovered
    let executor = cluster.executor();
    let failed = {
        let mut failed = 0;
        for _ in 0..20 {
            if executor.update(&p).await.is_err() {
                failed += 1;
            }
        }
        failed
    };
    assert!(failed > 0);
}
