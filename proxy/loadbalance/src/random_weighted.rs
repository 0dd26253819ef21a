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
use rand::{thread_rng, Rng};

use crate::balance::LoadBalance;

#[derive(Debug, Clone, Default)]
pub struct RandomWeighted {
    pub items: Vec<Endpoint>,
    pub sum_of_weights: i64,
}

impl LoadBalance for RandomWeighted {
    // next: get next endpoint
    fn next(&self) -> Option<&Endpoint> {
        if self.items.is_empty() || self.sum_of_weights <= 0 {
            return None;
        }

        let mut random_weight = thread_rng().gen_range(0..self.sum_of_weights) + 1;
        for i in &self.items {
            random_weight -= i.weight;
            if random_weight <= 0 {
                return Some(i);
            }
        }
        self.items.last()
    }

    // add: add endpoint
    fn add(&mut self, endpoint: Endpoint) {
        if endpoint.weight <= 0 || self.item_exists(&endpoint) {
            return;
        }
        self.sum_of_weights += endpoint.weight;
        self.items.push(endpoint);
    }

    // item_exists: endpoint exists
    fn item_exists(&self, endpoint: &Endpoint) -> bool {
        self.items.iter().any(|x| x.is_same(endpoint))
    }

    // get_all: get all endpoint
    fn get_all(&self) -> &Vec<Endpoint> {
        &self.items
    }

    // remove_item: remove item
    fn remove_item(&mut self, endpoint: &Endpoint) {
        if let Some(index) = self.items.iter().position(|x| x.is_same(endpoint)) {
            let removed = self.items.remove(index);
            self.sum_of_weights -= removed.weight;
        }
    }

    // remove_all: remove all item
    fn remove_all(&mut self) {
        self.items.clear();
        self.sum_of_weights = 0;
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_random_weighted_distribution() {
        let mut rw = RandomWeighted::default();
        rw.add(Endpoint::new("ds0", "s0", 1));
        rw.add(Endpoint::new("ds1", "s0", 9));
        rw.add(Endpoint::new("ds1", "s0", 9));
        assert_eq!(rw.sum_of_weights, 10);

        let mut hits = HashMap::new();
        for _ in 0..10000 {
            *hits.entry(rw.next().unwrap().name.clone()).or_insert(0) += 1;
        }
        assert!(hits["ds1"] > hits["ds0"] * 3);
    }

    #[test]
    fn test_random_weighted_remove() {
        let mut rw = RandomWeighted::default();
        rw.add(Endpoint::new("ds0", "s0", 2));
        rw.add(Endpoint::new("ds1", "s0", 3));
        rw.remove_item(&Endpoint::new("ds0", "s0", 2));
        assert_eq!(rw.sum_of_weights, 3);
        assert_eq!(rw.next().unwrap().name, "ds1");

        rw.remove_all();
        assert!(rw.next().is_none());
    }
}
