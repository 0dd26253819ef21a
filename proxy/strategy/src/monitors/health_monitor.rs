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

use std::{collections::BTreeSet, panic::AssertUnwindSafe, sync::Arc};

use crossbeam_channel::Receiver;
use futures::FutureExt;
use tokio::{
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::MonitorConfig,
    datasource::{DataSourceRepository, PhysicalConn},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Recovered,
    Failed(String),
    Panicked,
    TimedOut,
}

/// Moves reported datasources out of their selectors and probes them every
/// interval until a validation succeeds again.
pub struct HealthMonitor<C: PhysicalConn> {
    repository: Arc<DataSourceRepository<C>>,
    reports: Receiver<String>,
    suspects: BTreeSet<String>,
    interval: Duration,
    validation_timeout: Duration,
}

impl<C: PhysicalConn> HealthMonitor<C> {
    pub fn new(repository: Arc<DataSourceRepository<C>>, config: &MonitorConfig) -> Self {
        HealthMonitor {
            reports: repository.failure_reports(),
            repository,
            suspects: BTreeSet::new(),
            interval: Duration::from_millis(config.interval_ms),
            validation_timeout: Duration::from_millis(config.validation_timeout_ms),
        }
    }

    pub fn suspects(&self) -> &BTreeSet<String> {
        &self.suspects
    }

    /// One monitor cycle: demote newly reported datasources, then validate
    /// every suspect.
    pub async fn check_once(&mut self) -> Vec<(String, CheckStatus)> {
        for uid in self.reports.try_iter() {
            if self.suspects.insert(uid.clone()) {
                self.repository.abnormal(&uid);
            }
        }

        let mut results = vec![];
        for uid in self.suspects.clone() {
            let datasource = match self.repository.datasource(&uid) {
                Some(ds) => Arc::clone(ds),
                None => {
                    self.suspects.remove(&uid);
                    continue;
                }
            };

            let check = AssertUnwindSafe(datasource.validate()).catch_unwind();
            let status = match time::timeout(self.validation_timeout, check).await {
                Ok(Ok(Ok(()))) => CheckStatus::Recovered,
                Ok(Ok(Err(e))) => CheckStatus::Failed(e.to_string()),
                Ok(Err(_)) => CheckStatus::Panicked,
                Err(_) => CheckStatus::TimedOut,
            };

            match &status {
                CheckStatus::Recovered => {
                    self.repository.wakeup(&uid);
                    self.suspects.remove(&uid);
                    info!("datasource {} validation passed", uid);
                }
                CheckStatus::Failed(e) => error!("datasource {} validation failed: {}", uid, e),
                CheckStatus::Panicked => error!("datasource {} validation panicked", uid),
                CheckStatus::TimedOut => {
                    error!("datasource {} validation timed out after {:?}", uid, self.validation_timeout)
                }
            }
            results.push((uid, status));
        }
        results
    }

    /// Runs the monitor loop until `token` is cancelled.
    pub fn start(mut self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("health monitor started, interval {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        warn!("health monitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.check_once().await;
                    }
                }
            }
        })
    }
}
