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

/// How a dispatch call wants its datasource picked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Optional {
    pub shard_name: String,
    pub dbid: Option<String>,
    pub read_only: bool,
    pub retry: usize,
}

impl Optional {
    pub fn new(shard_name: impl Into<String>) -> Self {
        Optional { shard_name: shard_name.into(), ..Default::default() }
    }

    pub fn dbid(mut self, dbid: impl Into<String>) -> Self {
        self.dbid = Some(dbid.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }
}
