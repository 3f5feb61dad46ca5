//! Driver configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration for statement analysis and execution
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Session identifier used to scope `CACHE SESSION` entries
    pub session_id: String,
    /// Maximum nesting of relationship subqueries and nested sub-select calls
    pub max_nesting_depth: u8,
    /// Result and metadata cache settings
    pub cache: CacheConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            max_nesting_depth: 5,
            cache: CacheConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a JSON document; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidStatement(format!("config: {}", e)))
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Cache eviction settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of an entry, counted from its creation
    pub ttl_secs: u64,
    /// Aggregate weight budget; the oldest entries go first once it is exceeded
    pub max_weight: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_weight: 16 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
