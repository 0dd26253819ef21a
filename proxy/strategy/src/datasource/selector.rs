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

use std::{collections::BTreeSet, sync::Arc};

use arc_swap::ArcSwap;
use endpoint::endpoint::Endpoint;
use loadbalance::{
    balance::{AlgorithmName, Balance, BalanceType, LoadBalance},
    consistent_hash::DEFAULT_REPLICAS,
};
use pisa_error::error::{Error, ErrorKind};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    pub uid: String,
    pub r_weight: i64,
    pub w_weight: i64,
}

/// Immutable view of the active members, swapped as a whole whenever a
/// member goes abnormal or wakes up.
#[derive(Debug, Clone)]
pub struct Membership {
    readable: BalanceType,
    writable: BalanceType,
    abnormal: BTreeSet<String>,
}

impl Membership {
    pub fn readable(&self) -> &BalanceType {
        &self.readable
    }

    pub fn writable(&self) -> &BalanceType {
        &self.writable
    }

    pub fn abnormal(&self) -> &BTreeSet<String> {
        &self.abnormal
    }
}

#[derive(Debug)]
pub struct SelectorCore {
    shard: String,
    members: Vec<MemberSpec>,
    read_algorithm: AlgorithmName,
    write_algorithm: AlgorithmName,
    replicas: usize,
    snapshot: ArcSwap<Membership>,
}

impl SelectorCore {
    fn new(
        shard: &str,
        members: Vec<MemberSpec>,
        read_algorithm: AlgorithmName,
        write_algorithm: AlgorithmName,
        replicas: usize,
    ) -> Self {
        let mut core = SelectorCore {
            shard: shard.to_string(),
            members,
            read_algorithm,
            write_algorithm,
            replicas,
            snapshot: ArcSwap::from_pointee(Membership {
                readable: Balance.build_balance(read_algorithm),
                writable: Balance.build_balance(write_algorithm),
                abnormal: BTreeSet::new(),
            }),
        };
        core.snapshot = ArcSwap::from_pointee(core.membership(BTreeSet::new()));
        core
    }

    // Rebuilds both role balancers explicitly from the active members.
    fn membership(&self, abnormal: BTreeSet<String>) -> Membership {
        let active = |role_weight: fn(&MemberSpec) -> i64| {
            self.members
                .iter()
                .filter(|m| !abnormal.contains(&m.uid))
                .map(move |m| Endpoint::new(&m.uid, &self.shard, role_weight(m)))
                .collect::<Vec<_>>()
        };
        let readable =
            Balance.build_balance_replicas(self.read_algorithm, self.replicas, active(|m| m.r_weight));
        let writable =
            Balance.build_balance_replicas(self.write_algorithm, self.replicas, active(|m| m.w_weight));
        Membership { readable, writable, abnormal }
    }

    pub fn snapshot(&self) -> Arc<Membership> {
        self.snapshot.load_full()
    }

    fn contains(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m.uid == uid)
    }

    fn is_active(&self, uid: &str) -> bool {
        self.contains(uid) && !self.snapshot.load().abnormal.contains(uid)
    }

    fn next(&self, read_only: bool) -> Option<String> {
        let snapshot = self.snapshot.load();
        let balance = if read_only { &snapshot.readable } else { &snapshot.writable };
        balance.next().map(|ep| ep.name.clone())
    }

    fn abnormal(&self, uid: &str) -> bool {
        let current = self.snapshot.load_full();
        if !self.contains(uid) || current.abnormal.contains(uid) {
            return false;
        }
        let mut abnormal = current.abnormal.clone();
        abnormal.insert(uid.to_string());
        self.snapshot.store(Arc::new(self.membership(abnormal)));
        warn!("shard {} datasource {} is abnormal", self.shard, uid);
        true
    }

    fn wakeup(&self, uid: &str) -> bool {
        let current = self.snapshot.load_full();
        if !current.abnormal.contains(uid) {
            return false;
        }
        let mut abnormal = current.abnormal.clone();
        abnormal.remove(uid);
        self.snapshot.store(Arc::new(self.membership(abnormal)));
        info!("shard {} datasource {} woke up", self.shard, uid);
        true
    }
}

/// Per shard choice of a datasource, shaped by the shard topology.
#[derive(Debug)]
pub enum DataSourceSelector {
    // A single member serving reads and writes.
    Standalone(SelectorCore),
    // One writable member, reads balanced over the readable ones.
    OneMaster(SelectorCore),
    // Several writable members, both roles balanced independently.
    MultiMaster(SelectorCore),
}

impl DataSourceSelector {
    pub fn build(
        shard: &str,
        members: Vec<MemberSpec>,
        balance: Option<AlgorithmName>,
        replicas: Option<usize>,
    ) -> Result<Self, Error> {
        let writable = members.iter().filter(|m| m.w_weight > 0).count();
        if writable == 0 {
            return Err(Error::new(ErrorKind::Config(format!(
                "shard {:?} has no writable datasource",
                shard
            ))));
        }

        let replicas = replicas.unwrap_or(DEFAULT_REPLICAS);
        let selector = if members.len() == 1 {
            DataSourceSelector::Standalone(SelectorCore::new(
                shard,
                members,
                AlgorithmName::Random,
                AlgorithmName::Random,
                replicas,
            ))
        } else if writable == 1 {
            let read = balance.unwrap_or(AlgorithmName::Random);
            DataSourceSelector::OneMaster(SelectorCore::new(
                shard,
                members,
                read,
                AlgorithmName::Random,
                replicas,
            ))
        } else {
            let algo = balance.unwrap_or(AlgorithmName::ConsistentHash);
            DataSourceSelector::MultiMaster(SelectorCore::new(shard, members, algo, algo, replicas))
        };
        Ok(selector)
    }

    pub fn core(&self) -> &SelectorCore {
        match self {
            DataSourceSelector::Standalone(core)
            | DataSourceSelector::OneMaster(core)
            | DataSourceSelector::MultiMaster(core) => core,
        }
    }

    pub fn shard_name(&self) -> &str {
        &self.core().shard
    }

    pub fn members(&self) -> &[MemberSpec] {
        &self.core().members
    }

    pub fn is_active(&self, uid: &str) -> bool {
        self.core().is_active(uid)
    }

    /// Weighted pick among the active members of the role.
    pub fn do_select(&self, read_only: bool) -> Option<String> {
        match self {
            DataSourceSelector::Standalone(core) => {
                core.members.first().filter(|m| core.is_active(&m.uid)).map(|m| m.uid.clone())
            }
            DataSourceSelector::OneMaster(core) | DataSourceSelector::MultiMaster(core) => {
                core.next(read_only)
            }
        }
    }

    /// First active member of the role not in `exclude`, in config order.
    pub fn do_select_exclude(&self, read_only: bool, exclude: &[String]) -> Option<String> {
        let core = self.core();
        let standalone = matches!(self, DataSourceSelector::Standalone(_));
        core.members
            .iter()
            .filter(|m| standalone || if read_only { m.r_weight > 0 } else { m.w_weight > 0 })
            .filter(|m| !exclude.contains(&m.uid))
            .find(|m| core.is_active(&m.uid))
            .map(|m| m.uid.clone())
    }

    // Explicit datasource requested by the caller.
    pub fn select_dbid(&self, dbid: &str) -> Option<String> {
        if self.is_active(dbid) {
            Some(dbid.to_string())
        } else {
            None
        }
    }

    pub fn abnormal(&self, uid: &str) -> bool {
        self.core().abnormal(uid)
    }

    pub fn wakeup(&self, uid: &str) -> bool {
        self.core().wakeup(uid)
    }
}
