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

use std::collections::BTreeMap;

use crc32fast::Hasher;
use endpoint::endpoint::Endpoint;
use rand::{thread_rng, Rng};

use crate::balance::LoadBalance;

pub const DEFAULT_REPLICAS: usize = 16;

/// Consistent-hash ring. Every endpoint owns `replicas * weight` virtual
/// nodes, so heavier endpoints own a larger share of the ring.
#[derive(Debug, Clone)]
pub struct ConsistentHash {
    pub items: Vec<Endpoint>,
    replicas: usize,
    ring: BTreeMap<u32, usize>,
}

impl Default for ConsistentHash {
    fn default() -> Self {
        ConsistentHash::with_replicas(DEFAULT_REPLICAS)
    }
}

fn hash(key: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(key);
    hasher.finalize()
}

impl ConsistentHash {
    pub fn with_replicas(replicas: usize) -> Self {
        ConsistentHash { items: vec![], replicas: replicas.max(1), ring: BTreeMap::new() }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    fn rebuild(&mut self) {
        self.ring.clear();
        for (idx, ep) in self.items.iter().enumerate() {
            let vnodes = self.replicas * ep.weight as usize;
            for i in 0..vnodes {
                self.ring.insert(hash(format!("{}#{}", ep.name, i).as_bytes()), idx);
            }
        }
    }

    fn locate(&self, point: u32) -> Option<&Endpoint> {
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .and_then(|(_, idx)| self.items.get(*idx))
    }

    /// Same key always lands on the same endpoint while membership is stable.
    pub fn next_with_key(&self, key: &[u8]) -> Option<&Endpoint> {
        self.locate(hash(key))
    }
}

impl LoadBalance for ConsistentHash {
    fn next(&self) -> Option<&Endpoint> {
        if self.ring.is_empty() {
            return None;
        }
        self.locate(thread_rng().gen())
    }

    fn add(&mut self, endpoint: Endpoint) {
        if endpoint.weight <= 0 || self.item_exists(&endpoint) {
            return;
        }
        self.items.push(endpoint);
        self.rebuild();
    }

    fn item_exists(&self, endpoint: &Endpoint) -> bool {
        self.items.iter().any(|x| x.is_same(endpoint))
    }

    fn get_all(&self) -> &Vec<Endpoint> {
        &self.items
    }

    fn remove_item(&mut self, endpoint: &Endpoint) {
        if let Some(index) = self.items.iter().position(|x| x.is_same(endpoint)) {
            self.items.remove(index);
            self.rebuild();
        }
    }

    fn remove_all(&mut self) {
        self.items.clear();
        self.ring.clear();
    }
}
