//! Configuration loading and state folder resolution
//!
//! Bootstrap settings come from a small TOML file. Everything in it is
//! optional: a missing or unreadable file is logged and replaced by
//! built-in defaults, never fatal.
//!
//! State folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `LOCMERGE_STATE_DIR`
//! 3. TOML `state_dir`
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the state folder
pub const STATE_DIR_ENV: &str = "LOCMERGE_STATE_DIR";

/// Environment variable naming the TOML config file
pub const CONFIG_ENV: &str = "LOCMERGE_CONFIG";

/// File name of the keyspace holding pending localities and the worklist
pub const WORK_DB_FILE: &str = "work.db";

/// File name of the keyspace holding the synonym/exclusion relation
pub const EXCLUSION_DB_FILE: &str = "exclusions.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Folder holding both keyspace files
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Consolidation engine tuning (optional)
    #[serde(default)]
    pub consolidation: ConsolidationToml,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[consolidation]` section; unset keys fall back to engine defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsolidationToml {
    pub phonetic_coder: Option<String>,
    pub min_word_len: Option<usize>,
    pub yield_target_ms: Option<u64>,
    pub yield_initial_interval: Option<u64>,
    pub yield_smoothing: Option<f64>,
    pub max_lock_wait_ms: Option<u64>,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Load the config file named explicitly, by `LOCMERGE_CONFIG`, or at the
    /// platform default location. Falls back to defaults with a warning.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(default_config_path);

        let Some(path) = path else {
            debug!("No config file location available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            if explicit.is_some() {
                warn!("Config file {} not found, using defaults", path.display());
            } else {
                debug!("No config file at {}, using defaults", path.display());
            }
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }
}

/// Platform config file location: `<config dir>/locmerge/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("locmerge").join("config.toml"))
}

/// Resolve the state folder following the documented priority order
pub fn resolve_state_dir(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(STATE_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.state_dir {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_state_dir()
}

/// OS-dependent default state folder
fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("locmerge"))
        .unwrap_or_else(|| PathBuf::from("./locmerge_data"))
}

/// Locations of the two keyspace files inside the state folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
    pub work_db: PathBuf,
    pub exclusion_db: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            work_db: root.join(WORK_DB_FILE),
            exclusion_db: root.join(EXCLUSION_DB_FILE),
            root,
        }
    }

    /// Create the state folder if missing
    pub fn ensure_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            debug!("Created state folder {}", self.root.display());
        }
        Ok(())
    }
}
