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

use serde::{Deserialize, Serialize};

/// One physical datasource as seen by balancers and selectors. `name` is the
/// datasource uid, `weight` the role weight the balancer was built with.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    pub weight: i64,
    pub name: String,
    pub shard: String,
    pub db: String,
    pub user: String,
    pub password: String,
    pub addr: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, shard: impl Into<String>, weight: i64) -> Self {
        Endpoint { weight, name: name.into(), shard: shard.into(), ..Default::default() }
    }

    // Same datasource, different role weight.
    pub fn with_weight(&self, weight: i64) -> Self {
        Endpoint { weight, ..self.clone() }
    }

    pub fn is_same(&self, other: &Endpoint) -> bool {
        self.name == other.name && self.shard == other.shard
    }
}
