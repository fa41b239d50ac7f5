use serde::Deserialize;
use thiserror::Error;

use crate::HASH_MASK;

/// The largest cache array a single backing store may grow to.
const MAX_CACHE_ENTRIES: usize = HASH_MASK as usize + 1;

/// An invalid [`StoreConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A cache array size that is not a power of two.
    #[error("{field} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// The name of the offending field.
        field: &'static str,
        /// The configured value.
        value: usize,
    },
    /// The initial size exceeds the growth cap.
    #[error("initial_entries ({initial}) exceeds max_entries ({max})")]
    InitialExceedsMax {
        /// The configured initial size.
        initial: usize,
        /// The configured cap.
        max: usize,
    },
    /// The growth cap exceeds what slot hashes can address.
    #[error("max_entries ({0}) exceeds the addressable limit of {max}", max = MAX_CACHE_ENTRIES)]
    MaxTooLarge(usize),
    /// A load factor outside of `1..=100`.
    #[error("load_factor_percent must be within 1..=100, got {0}")]
    InvalidLoadFactor(u8),
}

/// Sizing of the fast-path cache array of each backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of slots a freshly created cache array has.
    pub initial_entries: usize,
    /// Percentage of occupied slots that triggers a stale-entry sweep, and doubling if the sweep
    /// was not enough.
    pub load_factor_percent: u8,
    /// A cache array never grows beyond this many slots.
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            initial_entries: 32,
            load_factor_percent: 67,
            max_entries: MAX_CACHE_ENTRIES,
        }
    }
}

impl StoreConfig {
    /// Checks that the sizes are usable for an open-addressed power-of-two array.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("initial_entries", self.initial_entries),
            ("max_entries", self.max_entries),
        ] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { field, value });
            }
        }
        if self.max_entries > MAX_CACHE_ENTRIES {
            return Err(ConfigError::MaxTooLarge(self.max_entries));
        }
        if self.initial_entries > self.max_entries {
            return Err(ConfigError::InitialExceedsMax {
                initial: self.initial_entries,
                max: self.max_entries,
            });
        }
        if !(1..=100).contains(&self.load_factor_percent) {
            return Err(ConfigError::InvalidLoadFactor(self.load_factor_percent));
        }
        Ok(())
    }

    /// The load at which a cache array of `len` slots needs attention.
    pub(crate) fn load_limit(&self, len: usize) -> usize {
        len * self.load_factor_percent as usize / 100
    }
}
