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

use std::{collections::HashMap, fmt, sync::Arc};

use crc32fast::Hasher;
use parking_lot::RwLock;

use super::{expression::string_hash, RuleKey};
use crate::value::Value;

pub struct AlgorithmContext<'a> {
    pub partition_count: usize,
    pub args: &'a [i64],
}

impl<'a> AlgorithmContext<'a> {
    // First arg overrides the partition count as modulus.
    fn modulus(&self) -> Result<i64, String> {
        let m = self.args.first().copied().unwrap_or(self.partition_count as i64);
        if m <= 0 {
            return Err(format!("invalid modulus {}", m));
        }
        Ok(m)
    }
}

pub type AlgorithmFn =
    Arc<dyn Fn(&[Value], &AlgorithmContext<'_>) -> Result<RuleKey, String> + Send + Sync>;

/// Named sharding algorithms. Rule columns are passed in declaration order,
/// unbound optional columns as `Value::Null`.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    algorithms: Arc<RwLock<HashMap<String, AlgorithmFn>>>,
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.algorithms.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("AlgorithmRegistry").field("algorithms", &names).finish()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        AlgorithmRegistry { algorithms: Arc::new(RwLock::new(BUILTIN_ALGORITHMS.clone())) }
    }
}

impl AlgorithmRegistry {
    pub fn empty() -> Self {
        AlgorithmRegistry { algorithms: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn register<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value], &AlgorithmContext<'_>) -> Result<RuleKey, String> + Send + Sync + 'static,
    {
        self.algorithms.write().insert(name.to_ascii_lowercase(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<AlgorithmFn> {
        self.algorithms.read().get(&name.to_ascii_lowercase()).cloned()
    }
}

lazy_static! {
    static ref BUILTIN_ALGORITHMS: HashMap<String, AlgorithmFn> = {
        let mut m: HashMap<String, AlgorithmFn> = HashMap::new();
        m.insert("mod".to_string(), Arc::new(mod_algorithm));
        m.insert("crc32_mod".to_string(), Arc::new(crc32_mod_algorithm));
        m.insert("hash_mod".to_string(), Arc::new(hash_mod_algorithm));
        m.insert("range".to_string(), Arc::new(range_algorithm));
        m
    };
}

fn first_value(values: &[Value]) -> Result<&Value, String> {
    values.iter().find(|v| !v.is_null()).ok_or_else(|| "no sharding value bound".to_string())
}

fn first_int(values: &[Value]) -> Result<i64, String> {
    let v = first_value(values)?;
    v.as_i64().ok_or_else(|| format!("{:?} is not an integer", v))
}

fn mod_algorithm(values: &[Value], ctx: &AlgorithmContext<'_>) -> Result<RuleKey, String> {
    Ok(RuleKey::Index(first_int(values)?.rem_euclid(ctx.modulus()?)))
}

fn crc32_mod_algorithm(values: &[Value], ctx: &AlgorithmContext<'_>) -> Result<RuleKey, String> {
    let mut hasher = Hasher::new();
    hasher.update(&first_value(values)?.key_bytes());
    let checksum = hasher.finalize() as i64;
    Ok(RuleKey::Index(checksum.rem_euclid(ctx.modulus()?)))
}

fn hash_mod_algorithm(values: &[Value], ctx: &AlgorithmContext<'_>) -> Result<RuleKey, String> {
    let h = string_hash(&first_value(values)?.to_string());
    Ok(RuleKey::Index(h.rem_euclid(ctx.modulus()?)))
}

// args are ascending exclusive upper bounds, key i goes to the first bound above it.
fn range_algorithm(values: &[Value], ctx: &AlgorithmContext<'_>) -> Result<RuleKey, String> {
    let v = first_int(values)?;
    ctx.args
        .iter()
        .position(|upper| v < *upper)
        .map(|idx| RuleKey::Index(idx as i64))
        .ok_or_else(|| format!("{} is above every range bound", v))
}
