//! AI configuration structures

use std::collections::BTreeMap;
use std::path::Path;

use kpai_goal::Frame;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::host::{
    ConfigProvider, BUILDER_RETREAT_TIMEOUT, DEFAULT_BUILDER_RETREAT_TIMEOUT,
    DEFAULT_RETREAT_PRIORITY, RETREAT_PRIORITY,
};
use crate::unit::UnitRole;

/// Top-level AI configuration, usually from `ai.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub tunables: Tunables,

    #[serde(default)]
    pub roles: RoleTable,
}

/// How often unit processors run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Processors only run on frames divisible by this.
    #[serde(default = "default_update_interval")]
    pub update_interval: Frame,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
        }
    }
}

/// Tunable parameters served through [`StaticConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    #[serde(default = "default_builder_retreat_timeout")]
    pub builder_retreat_timeout: i64,

    #[serde(default = "default_retreat_priority")]
    pub retreat_priority: i64,

    /// Any other integer keys, looked up verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, i64>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            builder_retreat_timeout: default_builder_retreat_timeout(),
            retreat_priority: default_retreat_priority(),
            extra: BTreeMap::new(),
        }
    }
}

/// Unit definition names per role, and what each role builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTable {
    #[serde(default = "default_constructors")]
    pub constructors: Vec<String>,

    #[serde(default = "default_bases")]
    pub bases: Vec<String>,

    #[serde(default = "default_expansions")]
    pub expansions: Vec<String>,

    /// Constructor def → the expansion it builds.
    #[serde(default = "default_expansion_for")]
    pub expansion_for: BTreeMap<String, String>,

    /// Base def → the constructor it builds.
    #[serde(default = "default_constructor_for")]
    pub constructor_for: BTreeMap<String, String>,
}

impl Default for RoleTable {
    fn default() -> Self {
        Self {
            constructors: default_constructors(),
            bases: default_bases(),
            expansions: default_expansions(),
            expansion_for: default_expansion_for(),
            constructor_for: default_constructor_for(),
        }
    }
}

impl RoleTable {
    /// Roles of a unit definition. Unknown names get no role.
    pub fn classify(&self, def_name: &str) -> UnitRole {
        let has = |names: &[String]| names.iter().any(|n| n == def_name);
        UnitRole {
            constructor: has(&self.constructors),
            base: has(&self.bases),
            expansion: has(&self.expansions),
        }
    }

    pub fn expansion_for(&self, constructor_def: &str) -> Option<&str> {
        self.expansion_for.get(constructor_def).map(String::as_str)
    }

    pub fn constructor_for(&self, base_def: &str) -> Option<&str> {
        self.constructor_for.get(base_def).map(String::as_str)
    }
}

// Serde default functions
fn default_update_interval() -> Frame {
    30
}

fn default_builder_retreat_timeout() -> i64 {
    DEFAULT_BUILDER_RETREAT_TIMEOUT
}

fn default_retreat_priority() -> i64 {
    DEFAULT_RETREAT_PRIORITY
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn pairs(list: &[(&str, &str)]) -> BTreeMap<String, String> {
    list.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_constructors() -> Vec<String> {
    names(&["assembler", "gateway", "trojan"])
}

fn default_bases() -> Vec<String> {
    names(&["kernel", "hole", "carrier"])
}

fn default_expansions() -> Vec<String> {
    names(&["window", "socket", "port"])
}

fn default_expansion_for() -> BTreeMap<String, String> {
    pairs(&[
        ("assembler", "socket"),
        ("trojan", "window"),
        ("gateway", "port"),
    ])
}

fn default_constructor_for() -> BTreeMap<String, String> {
    pairs(&[
        ("kernel", "assembler"),
        ("hole", "trojan"),
        ("carrier", "gateway"),
    ])
}

impl AiConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let content = std::fs::read_to_string(path).map_err(|e| AgentError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: AiConfig = toml::from_str(&content).map_err(|e| AgentError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if config.scheduler.update_interval == 0 {
            return Err(AgentError::Config {
                path: path.to_path_buf(),
                message: "scheduler.update_interval must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    /// Try to load config, returning default if the file doesn't exist or
    /// is invalid.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("{}; using defaults", e);
            Self::default()
        })
    }
}

/// A [`ConfigProvider`] backed by the `[tunables]` table.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    tunables: Tunables,
}

impl StaticConfig {
    pub fn new(tunables: Tunables) -> Self {
        Self { tunables }
    }
}

impl ConfigProvider for StaticConfig {
    fn int_value(&self, key: &str, _frame: Frame) -> Option<i64> {
        match key {
            BUILDER_RETREAT_TIMEOUT => Some(self.tunables.builder_retreat_timeout),
            RETREAT_PRIORITY => Some(self.tunables.retreat_priority),
            other => self.tunables.extra.get(other).copied(),
        }
    }
}
