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

use std::{env, ffi::OsString, fs, io};

use clap::{Arg, ArgMatches, Command};
use serde::{Deserialize, Serialize};
use strategy::config::Sharding;
use tracing::trace;

use crate::env_const::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path:?} error: {source}")]
    Io { path: String, source: io::Error },

    #[error("parse config error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("invalid argument {0:?}, expected column=value")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    #[serde(default)]
    pub log_level: String,
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Check,
    Route(RouteArgs),
}

impl Default for Action {
    fn default() -> Self {
        Action::Check
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteArgs {
    pub table: String,
    pub kind: String,
    pub values: Vec<(String, String)>,
}

#[derive(Default, Clone, Debug)]
pub struct ShardProxyConfigBuilder {
    pub _config_path: String,
    pub _log_level: String,
    pub _version: String,
    pub _action: Action,

    pub _git_tag: String,
    pub _git_commit: String,
    pub _git_branch: String,
}

fn command() -> Command<'static> {
    Command::new("shard-route")
        .about("Sharding rule checker and dry-run router")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Config path")
                .env(ENV_SHARD_PROXY_CONFIG)
                .default_value(DEFAULT_LOCAL_CONFIG)
                .takes_value(true),
        )
        .arg(
            Arg::new("loglevel")
                .long("log-level")
                .help("Log level")
                .env(ENV_SHARD_PROXY_LOG_LEVEL)
                .takes_value(true),
        )
        .subcommand(Command::new("check").about("Validate the sharding config"))
        .subcommand(
            Command::new("route")
                .about("Print the fragments a statement is split into")
                .arg(
                    Arg::new("table")
                        .short('t')
                        .long("table")
                        .help("Logical table")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::new("kind")
                        .short('k')
                        .long("kind")
                        .help("Statement kind")
                        .possible_values(["select", "insert", "delete"])
                        .default_value("select")
                        .takes_value(true),
                )
                .arg(
                    Arg::new("value")
                        .short('v')
                        .long("value")
                        .help("Column value, as column=value")
                        .multiple_occurrences(true)
                        .takes_value(true),
                ),
        )
}

fn route_args(cmd: &ArgMatches) -> Result<RouteArgs, ConfigError> {
    let mut values = vec![];
    for v in cmd.values_of("value").into_iter().flatten() {
        match v.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                values.push((name.trim().to_string(), value.trim().to_string()))
            }
            _ => return Err(ConfigError::InvalidArgument(v.to_string())),
        }
    }

    Ok(RouteArgs {
        table: cmd.value_of("table").unwrap_or_default().to_string(),
        kind: cmd.value_of("kind").unwrap_or("select").to_string(),
        values,
    })
}

impl ShardProxyConfigBuilder {
    pub fn new() -> Self {
        ShardProxyConfigBuilder::default()
    }

    pub fn build_from_cmd(self) -> Result<Self, ConfigError> {
        self.build_from_args(env::args_os())
    }

    pub fn build_from_args<I, T>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;

        if let Some(path) = matches.value_of("config") {
            self._config_path = path.to_string();
        }
        if let Some(loglevel) = matches.value_of("loglevel") {
            self._log_level = loglevel.to_string();
        }

        self._action = match matches.subcommand() {
            Some(("route", cmd)) => Action::Route(route_args(cmd)?),
            _ => Action::Check,
        };

        Ok(self)
    }

    pub fn build_from_env(mut self) -> Self {
        self._git_tag = env::var(ENV_GIT_TAG).unwrap_or_default();
        self._git_commit = env::var(ENV_GIT_COMMIT).unwrap_or_default();
        self._git_branch = env::var(ENV_GIT_BRANCH).unwrap_or_default();
        self
    }

    pub fn build_version(mut self) -> Self {
        if !self._git_tag.is_empty() {
            self._version = self._git_tag.clone();
        } else if !self._git_branch.is_empty() {
            self._version = format!("{}-{}", self._git_branch, self._git_commit);
        } else {
            self._version = env!("CARGO_PKG_VERSION").to_string();
        }
        self
    }

    pub fn build_from_str(&self, config_str: &str) -> Result<ShardProxyConfig, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn build_from_file(&self, path: &str) -> Result<ShardProxyConfig, ConfigError> {
        let config_str = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_string(), source })?;
        self.build_from_str(&config_str)
    }

    pub fn action(&self) -> &Action {
        &self._action
    }

    /// Reads the config file and applies command line and environment
    /// overrides on top of it.
    pub fn load_config(&self) -> Result<ShardProxyConfig, ConfigError> {
        let path = if self._config_path.is_empty() {
            DEFAULT_LOCAL_CONFIG
        } else {
            self._config_path.as_str()
        };
        let mut config = self.build_from_file(path)?;
        self.merge(&mut config);
        trace!("configs: {:#?}", config);
        Ok(config)
    }

    fn merge(&self, config: &mut ShardProxyConfig) {
        if !self._log_level.is_empty() {
            config.admin.log_level = self._log_level.clone();
        }
        if config.admin.log_level.is_empty() {
            config.admin.log_level = DEFAULT_SHARD_PROXY_LOG_LEVEL.to_string();
        }
        if !self._version.is_empty() {
            config.version = Some(self._version.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShardProxyConfig {
    #[serde(default)]
    pub admin: Admin,
    #[serde(default)]
    pub sharding: Sharding,
    pub version: Option<String>,
}

impl ShardProxyConfig {
    pub fn new() -> Self {
        ShardProxyConfig::default()
    }

    pub fn get_admin(&self) -> &Admin {
        &self.admin
    }

    pub fn get_sharding(&self) -> &Sharding {
        &self.sharding
    }

    pub fn get_version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }
}
