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

use endpoint::endpoint::Endpoint;
use serde::{Deserialize, Serialize};

use crate::{
    consistent_hash::{ConsistentHash, DEFAULT_REPLICAS},
    random_weighted::RandomWeighted,
    roundrobin_weighted::RoundRobinWeighted,
};
pub struct Balance;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmName {
    Random,
    RoundRobin,
    #[serde(rename = "consistent_hash")]
    ConsistentHash,
}

impl Default for AlgorithmName {
    fn default() -> Self {
        AlgorithmName::Random
    }
}

/// Balancers are built once per membership change and then only read, so
/// `next` takes `&self`. Endpoints with a weight <= 0 never get selected.
pub trait LoadBalance {
    fn next(&self) -> Option<&Endpoint>;
    fn add(&mut self, endpoint: Endpoint);
    fn item_exists(&self, endpoint: &Endpoint) -> bool;
    fn get_all(&self) -> &Vec<Endpoint>;
    fn remove_item(&mut self, endpoint: &Endpoint);
    fn remove_all(&mut self);
}

#[derive(Debug, Clone)]
pub enum BalanceType {
    Random(RandomWeighted),
    RoundRobin(RoundRobinWeighted),
    ConsistentHash(ConsistentHash),
}

impl BalanceType {
    pub fn is_empty(&self) -> bool {
        self.get_all().is_empty()
    }
}

impl LoadBalance for BalanceType {
    fn next(&self) -> Option<&Endpoint> {
        match self {
            BalanceType::Random(inner_random) => inner_random.next(),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.next(),
            BalanceType::ConsistentHash(inner_hash) => inner_hash.next(),
        }
    }

    fn add(&mut self, endpoint: Endpoint) {
        match self {
            BalanceType::Random(inner_random) => inner_random.add(endpoint),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.add(endpoint),
            BalanceType::ConsistentHash(inner_hash) => inner_hash.add(endpoint),
        }
    }

    fn item_exists(&self, endpoint: &Endpoint) -> bool {
        match self {
            BalanceType::Random(inner_random) => inner_random.item_exists(endpoint),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.item_exists(endpoint),
            BalanceType::ConsistentHash(inner_hash) => inner_hash.item_exists(endpoint),
        }
    }

    fn get_all(&self) -> &Vec<Endpoint> {
        match self {
            BalanceType::Random(inner_random) => inner_random.get_all(),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.get_all(),
            BalanceType::ConsistentHash(inner_hash) => inner_hash.get_all(),
        }
    }

    fn remove_item(&mut self, endpoint: &Endpoint) {
        match self {
            BalanceType::Random(inner_random) => inner_random.remove_item(endpoint),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.remove_item(endpoint),
            BalanceType::ConsistentHash(inner_hash) => inner_hash.remove_item(endpoint),
        }
    }

    fn remove_all(&mut self) {
        match self {
            BalanceType::Random(inner_random) => inner_random.remove_all(),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.remove_all(),
            BalanceType::ConsistentHash(inner_hash) => inner_hash.remove_all(),
        }
    }
}

impl Balance {
    pub fn build_balance(&self, algorithm_name: AlgorithmName) -> BalanceType {
        match algorithm_name {
            AlgorithmName::Random => BalanceType::Random(RandomWeighted::default()),
            AlgorithmName::RoundRobin => BalanceType::RoundRobin(RoundRobinWeighted::default()),
            AlgorithmName::ConsistentHash => {
                BalanceType::ConsistentHash(ConsistentHash::default())
            }
        }
    }

    pub fn build_balance_with(
        &self,
        algorithm_name: AlgorithmName,
        endpoints: impl IntoIterator<Item = Endpoint>,
    ) -> BalanceType {
        self.build_balance_replicas(algorithm_name, DEFAULT_REPLICAS, endpoints)
    }

    /// `replicas` is the number of ring nodes per unit of weight and only
    /// matters for `ConsistentHash`.
    pub fn build_balance_replicas(
        &self,
        algorithm_name: AlgorithmName,
        replicas: usize,
        endpoints: impl IntoIterator<Item = Endpoint>,
    ) -> BalanceType {
        let mut balance = match algorithm_name {
            AlgorithmName::ConsistentHash => {
                BalanceType::ConsistentHash(ConsistentHash::with_replicas(replicas))
            }
            _ => self.build_balance(algorithm_name),
        };
        for ep in endpoints {
            balance.add(ep);
        }
        balance
    }
}
