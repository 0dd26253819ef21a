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

#![warn(unused_must_use)]

mod dry_run;

use std::{process, str::FromStr, sync::Arc};

use config::config::{Action, ConfigError, RouteArgs, ShardProxyConfig, ShardProxyConfigBuilder};
use pisa_error::error::Error;
use runtime_shard::PreparedRoutingExecutor;
use strategy::{
    config::Sharding,
    datasource::{DataSourceRepository, DataSourceSelector, TracedConn},
    prepared::{Expr, IndexCondition, Prepared},
    route::{RoutingHandler, TableKind},
    rule::AlgorithmRegistry,
    value::Value,
};
use tracing::{error, info, Level};

use crate::dry_run::DryRunConn;

fn main() {
    let builder = match ShardProxyConfigBuilder::new().build_from_env().build_version().build_from_cmd()
    {
        Ok(builder) => builder,
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };
    let config = match builder.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(Level::from_str(config.admin.log_level.as_str()).ok())
        .init();
    info!("shard-route {}", config.get_version());

    let res = match builder.action() {
        Action::Check => check(&config).map(|report| report.join("\n")),
        Action::Route(args) => route(config.get_sharding(), args).map(|lines| lines.join("\n")),
    };
    match res {
        Ok(out) => println!("{}", out),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

type DryRunExecutor = PreparedRoutingExecutor<TracedConn<DryRunConn>>;

fn build_repository(sharding: &Sharding) -> Result<DataSourceRepository<TracedConn<DryRunConn>>, Error> {
    DataSourceRepository::build(sharding, |ds| TracedConn::new(DryRunConn::new(&ds.uid)))
}

fn build_executor(sharding: &Sharding) -> Result<DryRunExecutor, Error> {
    let handler = RoutingHandler::build(sharding, &AlgorithmRegistry::default())?;
    let repository = build_repository(sharding)?;
    Ok(PreparedRoutingExecutor::new(Arc::new(handler), Arc::new(repository), &sharding.executor))
}

/// Builds the whole topology and describes it.
fn check(config: &ShardProxyConfig) -> Result<Vec<String>, Error> {
    let sharding = config.get_sharding();
    let handler = RoutingHandler::build(sharding, &AlgorithmRegistry::default())?;
    let repository = build_repository(sharding)?;

    let mut report = vec![];
    for shard in &sharding.shard {
        let selector = match repository.selector(&shard.name) {
            Some(selector) => selector,
            None => continue,
        };
        let kind = match selector {
            DataSourceSelector::Standalone(_) => "standalone",
            DataSourceSelector::OneMaster(_) => "one master",
            DataSourceSelector::MultiMaster(_) => "multi master",
        };
        let members = selector
            .members()
            .iter()
            .map(|m| format!("{}(r{}/w{})", m.uid, m.r_weight, m.w_weight))
            .collect::<Vec<_>>();
        report.push(format!("shard {} [{}]: {}", shard.name, kind, members.join(", ")));
    }

    for table in &sharding.table {
        let mate = handler.table(&table.name)?;
        let kind = match &mate.kind {
            TableKind::Single(_) => "single".to_string(),
            TableKind::Sharded(router) => format!("sharded by {}", router.id),
            TableKind::Broadcast(_) => "broadcast".to_string(),
        };
        let nodes = mate.all_nodes().iter().map(|n| n.to_string()).collect::<Vec<_>>();
        report.push(format!("table {} [{}]: {}", table.name, kind, nodes.join(", ")));
    }

    info!("config ok, {} shard(s), {} table(s)", sharding.shard.len(), sharding.table.len());
    Ok(report)
}

fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::from(v);
    }
    let text = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')).unwrap_or(raw);
    Value::from(text)
}

fn build_prepared(args: &RouteArgs) -> Prepared {
    let values = args.values.iter().map(|(c, v)| (c.as_str(), parse_value(v))).collect::<Vec<_>>();

    if args.kind == "insert" {
        let columns = values.iter().map(|(c, _)| *c).collect::<Vec<_>>();
        let row = values.iter().map(|(_, v)| Expr::Value(v.clone())).collect();
        return Prepared::insert(&args.table, columns).row(row);
    }

    let mut prepared = if args.kind == "delete" {
        Prepared::delete(&args.table)
    } else {
        Prepared::select(&args.table)
    };
    if !values.is_empty() {
        let condition = values.iter().map(|(c, _)| format!("{} = ?", c)).collect::<Vec<_>>();
        let params = values.iter().map(|(_, v)| v.clone()).collect();
        prepared = prepared.condition(condition.join(" AND "), params);
    }
    for (column, value) in values {
        prepared = prepared.index_condition(IndexCondition::eq(column, value));
    }
    prepared
}

/// Plans the statement described by `args` and prints its fragments.
fn route(sharding: &Sharding, args: &RouteArgs) -> Result<Vec<String>, Error> {
    let executor = build_executor(sharding)?;
    let prepared = build_prepared(args);
    let plan = executor.explain(&prepared)?;

    let mut lines = plan.fragments.iter().map(|f| f.to_string()).collect::<Vec<_>>();
    if plan.broadcast {
        lines.push(format!("broadcast to {} shard(s)", plan.shard_count()));
    }
    Ok(lines)
}
