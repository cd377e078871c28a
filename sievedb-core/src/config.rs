//! Index configuration.
//!
//! Every knob has a default tuned for the common case, so `IndexConfig::default()`
//! is a valid configuration. Configs can also be loaded from JSON:
//!
//! ```
//! use sievedb_core::IndexConfig;
//!
//! let config = IndexConfig::from_json_str(r#"{ "raw_list_max_capacity": 32 }"#).unwrap();
//! assert_eq!(config.raw_list_max_capacity, 32);
//! assert_eq!(config.raw_list_initial_capacity, 4);
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for an [`Index`](crate::Index) and the bitsets it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum number of live arena slots (one per non-empty bitset plus
    /// transient slots during reallocation).
    pub arena_capacity: usize,
    /// Capacity of a freshly created raw list.
    pub raw_list_initial_capacity: u32,
    /// Largest raw list before the bitset switches to the dense bitmap.
    pub raw_list_max_capacity: u32,
    /// Fraction of `raw_list_max_capacity` that triggers the dense upgrade.
    pub upgrade_fraction: f64,
    /// Initial slot count of each value dictionary. Must be a power of two.
    pub dictionary_initial_slots: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            arena_capacity: 1 << 22,
            raw_list_initial_capacity: 4,
            raw_list_max_capacity: 64,
            upgrade_fraction: 0.75,
            dictionary_initial_slots: 256,
        }
    }
}

impl IndexConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the arena capacity. Chainable.
    pub fn with_arena_capacity(mut self, slots: usize) -> Self {
        self.arena_capacity = slots;
        self
    }

    /// Sets initial and maximum raw list capacities. Chainable.
    pub fn with_raw_list_capacity(mut self, initial: u32, max: u32) -> Self {
        self.raw_list_initial_capacity = initial;
        self.raw_list_max_capacity = max;
        self
    }

    /// Sets the upgrade fraction. Chainable.
    pub fn with_upgrade_fraction(mut self, fraction: f64) -> Self {
        self.upgrade_fraction = fraction;
        self
    }

    /// Sets the initial dictionary size. Chainable.
    pub fn with_dictionary_slots(mut self, slots: usize) -> Self {
        self.dictionary_initial_slots = slots;
        self
    }

    /// Number of members a raw list may hold before it is upgraded.
    #[inline]
    pub fn upgrade_threshold(&self) -> u32 {
        ((self.raw_list_max_capacity as f64 * self.upgrade_fraction) as u32).max(1)
    }

    /// Checks that the values are mutually consistent.
    pub fn validate(&self) -> Result<()> {
        if self.arena_capacity == 0 {
            return Err(Error::InvalidConfig("arena_capacity must be > 0".into()));
        }
        if self.raw_list_initial_capacity == 0 {
            return Err(Error::InvalidConfig(
                "raw_list_initial_capacity must be > 0".into(),
            ));
        }
        if self.raw_list_initial_capacity > self.raw_list_max_capacity {
            return Err(Error::InvalidConfig(format!(
                "raw_list_initial_capacity {} exceeds raw_list_max_capacity {}",
                self.raw_list_initial_capacity, self.raw_list_max_capacity
            )));
        }
        if !(self.upgrade_fraction > 0.0 && self.upgrade_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "upgrade_fraction must be in (0, 1], got {}",
                self.upgrade_fraction
            )));
        }
        if self.dictionary_initial_slots < 8 || !self.dictionary_initial_slots.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "dictionary_initial_slots must be a power of two >= 8, got {}",
                self.dictionary_initial_slots
            )));
        }
        Ok(())
    }

    /// Parses and validates a JSON config. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("parse config failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::ConfigError(format!("read config failed: {}", e)))?;
        Self::from_json_str(&content)
    }
}
