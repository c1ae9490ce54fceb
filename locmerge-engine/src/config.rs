//! Engine settings
//!
//! Resolution order per setting: environment variable (where one exists),
//! then the `[consolidation]` TOML section, then the built-in default. A value
//! that fails validation is logged and replaced by the default.

use crate::phonetic::{coder_by_name, PhoneticCoder, CODER_NAMES, DEFAULT_MIN_WORD_LEN};
use crate::yield_timer::YieldTimer;
use locmerge_common::config::TomlConfig;
use locmerge_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const PHONETIC_CODER_ENV: &str = "LOCMERGE_PHONETIC_CODER";
pub const YIELD_TARGET_ENV: &str = "LOCMERGE_YIELD_TARGET_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub phonetic_coder: String,
    pub min_word_len: usize,
    pub yield_target_ms: u64,
    pub yield_initial_interval: u64,
    pub yield_smoothing: f64,
    pub max_lock_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            phonetic_coder: "soundex".to_string(),
            min_word_len: DEFAULT_MIN_WORD_LEN,
            yield_target_ms: 50,
            yield_initial_interval: 256,
            yield_smoothing: 0.25,
            max_lock_wait_ms: 5000,
        }
    }
}

impl EngineSettings {
    pub fn resolve(toml_config: &TomlConfig) -> Self {
        let defaults = Self::default();
        let section = &toml_config.consolidation;

        let phonetic_coder = std::env::var(PHONETIC_CODER_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| section.phonetic_coder.clone())
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| {
                let known = CODER_NAMES.contains(&name.as_str());
                if !known {
                    warn!(coder = %name, "Unknown phonetic coder, using default");
                }
                known
            })
            .unwrap_or(defaults.phonetic_coder);

        let yield_target_ms = match std::env::var(YIELD_TARGET_ENV) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Some(ms),
                Err(e) => {
                    warn!(value = %raw, error = %e, "Invalid {}, ignoring", YIELD_TARGET_ENV);
                    section.yield_target_ms
                }
            },
            Err(_) => section.yield_target_ms,
        };

        Self {
            phonetic_coder,
            min_word_len: positive(section.min_word_len, defaults.min_word_len, "min_word_len"),
            yield_target_ms: positive(yield_target_ms, defaults.yield_target_ms, "yield_target_ms"),
            yield_initial_interval: positive(
                section.yield_initial_interval,
                defaults.yield_initial_interval,
                "yield_initial_interval",
            ),
            yield_smoothing: match section.yield_smoothing {
                Some(s) if s > 0.0 && s <= 1.0 => s,
                Some(s) => {
                    warn!(value = s, "yield_smoothing must be in (0, 1], using default");
                    defaults.yield_smoothing
                }
                None => defaults.yield_smoothing,
            },
            max_lock_wait_ms: section.max_lock_wait_ms.unwrap_or(defaults.max_lock_wait_ms),
        }
    }

    pub fn coder(&self) -> Result<Arc<dyn PhoneticCoder>> {
        coder_by_name(&self.phonetic_coder)
            .ok_or_else(|| Error::Config(format!("Unknown phonetic coder '{}'", self.phonetic_coder)))
    }

    pub fn yield_timer(&self) -> YieldTimer {
        YieldTimer::new(
            Duration::from_millis(self.yield_target_ms),
            self.yield_initial_interval,
            self.yield_smoothing,
        )
    }
}

fn positive<T>(value: Option<T>, default: T, key: &str) -> T
where
    T: PartialOrd + Default + Copy + std::fmt::Display,
{
    match value {
        Some(v) if v > T::default() => v,
        Some(v) => {
            warn!(key, value = %v, "Setting must be positive, using default");
            default
        }
        None => default,
    }
}
