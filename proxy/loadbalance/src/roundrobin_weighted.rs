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

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use endpoint::endpoint::Endpoint;

use crate::balance::LoadBalance;

/// Interleaved weighted round robin. The selection order of one full cycle is
/// computed whenever membership changes, `next` only advances a cursor.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinWeighted {
    pub items: Vec<Endpoint>,
    schedule: Vec<usize>,
    cursor: Arc<AtomicUsize>,
}

impl RoundRobinWeighted {
    fn rebuild(&mut self) {
        self.schedule.clear();
        let n = self.items.len() as i64;
        if n == 0 {
            return;
        }

        let gcd = self.items.iter().map(|x| x.weight).fold(0, gcd);
        let max_weight = self.items.iter().map(|x| x.weight).max().unwrap_or(0);
        let cycle: i64 = self.items.iter().map(|x| x.weight / gcd).sum();

        let mut i: i64 = -1;
        let mut cw: i64 = 0;
        while (self.schedule.len() as i64) < cycle {
            i = (i + 1) % n;
            if i == 0 {
                cw -= gcd;
                if cw <= 0 {
                    cw = max_weight;
                }
            }

            if self.items[i as usize].weight >= cw {
                self.schedule.push(i as usize);
            }
        }
    }
}

impl LoadBalance for RoundRobinWeighted {
    fn next(&self) -> Option<&Endpoint> {
        if self.schedule.is_empty() {
            return None;
        }

        let pos = self.cursor.fetch_add(1, Ordering::Relaxed) % self.schedule.len();
        self.items.get(self.schedule[pos])
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
        self.schedule.clear();
        self.cursor.store(0, Ordering::Relaxed);
    }
}

#[inline]
fn gcd(mut x: i64, mut y: i64) -> i64 {
    while y != 0 {
        let t = x % y;
        x = y;
        y = t;
    }
    x
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundrobin_weighted_cycle() {
        let mut rr = RoundRobinWeighted::default();
        rr.add(Endpoint::new("a", "s0", 4));
        rr.add(Endpoint::new("b", "s0", 2));
        rr.add(Endpoint::new("c", "s0", 2));

        let names = (0..8).map(|_| rr.next().unwrap().name.clone()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "a", "b", "c", "a", "a", "b", "c"]);
    }

    #[test]
    fn test_roundrobin_single() {
        let mut rr = RoundRobinWeighted::default();
        rr.add(Endpoint::new("a", "s0", 7));
        for _ in 0..3 {
            assert_eq!(rr.next().unwrap().name, "a");
        }
        rr.remove_item(&Endpoint::new("a", "s0", 7));
        assert!(rr.next().is_none());
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(0, 4), 4);
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(7, 3), 1);
    }
}
