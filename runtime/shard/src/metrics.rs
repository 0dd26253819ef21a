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

use once_cell::sync::Lazy;
use prometheus::{opts, HistogramOpts, HistogramVec, IntCounterVec, Registry};

// LABEL_NAME_SHARD refers to the shard a fragment ran against
const LABEL_NAME_SHARD: &str = "shard";
// LABEL_NAME_TYPE refers to the statement type of the fragment
const LABEL_NAME_TYPE: &str = "type";

pub static FRAGMENT_EXECUTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        opts!("shard_fragment_executed_total", "The total of executed fragments"),
        &[LABEL_NAME_SHARD, LABEL_NAME_TYPE],
    )
    .expect("Could not create FRAGMENT_EXECUTED_TOTAL")
});

pub static FRAGMENT_FAILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        opts!("shard_fragment_failed_total", "The total of failed fragments"),
        &[LABEL_NAME_SHARD, LABEL_NAME_TYPE],
    )
    .expect("Could not create FRAGMENT_FAILED_TOTAL")
});

pub static FRAGMENT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let opt = HistogramOpts {
        common_opts: opts!("shard_fragment_duration", "The duration of executed fragments"),
        buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
    };
    HistogramVec::new(opt, &[LABEL_NAME_SHARD, LABEL_NAME_TYPE])
        .expect("Could not create FRAGMENT_DURATION")
});

pub static STATEMENT_TIMEOUT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        opts!("shard_statement_timeout_total", "The total of statements cancelled by timeout"),
        &[LABEL_NAME_TYPE],
    )
    .expect("Could not create STATEMENT_TIMEOUT_TOTAL")
});

pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(FRAGMENT_EXECUTED_TOTAL.clone()))?;
    registry.register(Box::new(FRAGMENT_FAILED_TOTAL.clone()))?;
    registry.register(Box::new(FRAGMENT_DURATION.clone()))?;
    registry.register(Box::new(STATEMENT_TIMEOUT_TOTAL.clone()))?;
    Ok(())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ShardMetricsCollector;

impl ShardMetricsCollector {
    pub fn fragment_executed(&self, shard: &str, typ: &str, duration: f64) {
        FRAGMENT_EXECUTED_TOTAL.with_label_values(&[shard, typ]).inc();
        FRAGMENT_DURATION.with_label_values(&[shard, typ]).observe(duration);
    }

    pub fn fragment_failed(&self, shard: &str, typ: &str) {
        FRAGMENT_FAILED_TOTAL.with_label_values(&[shard, typ]).inc();
    }

    pub fn statement_timeout(&self, typ: &str) {
        STATEMENT_TIMEOUT_TOTAL.with_label_values(&[typ]).inc();
    }
}
