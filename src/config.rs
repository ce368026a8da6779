//! Configuration management for uve-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`UVE_EMU_MAX_BURSTS`, etc.)
//! 2. Project-local config file (`./uve-emu.toml`)
//! 3. User config file (`~/.config/uve-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # uve-emu.toml
//!
//! # Bursts a `drain` step may run before giving up on a stream
//! max_bursts = 4096
//!
//! # Record and print every memory access of a scenario
//! trace_memory = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// uve-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Upper bound on bursts one `drain` step performs.
    /// A stream still running after this many is reported as stalled.
    pub max_bursts: Option<usize>,

    /// Wrap scenario memory in a recorder and print the access log.
    pub trace_memory: Option<bool>,

    /// Bytes shown per region by `--dump-memory`.
    pub hexdump_bytes: Option<usize>,
}

impl Config {
    pub const DEFAULT_MAX_BURSTS: usize = 4096;
    pub const DEFAULT_HEXDUMP_BYTES: usize = 64;

    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `uve-emu.toml`
    /// 3. User config `~/.config/uve-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load user config first (lowest priority of file configs)
        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        // Load project-local config (higher priority)
        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    pub fn max_bursts(&self) -> usize {
        self.max_bursts.unwrap_or(Self::DEFAULT_MAX_BURSTS)
    }

    pub fn trace_memory(&self) -> bool {
        self.trace_memory.unwrap_or(false)
    }

    pub fn hexdump_bytes(&self) -> usize {
        self.hexdump_bytes.unwrap_or(Self::DEFAULT_HEXDUMP_BYTES)
    }

    /// Load user configuration from ~/.config/uve-emu/config.toml
    fn load_user_config() -> Option<Self> {
        Self::load_from_file(&Self::user_config_path()?)
    }

    /// Load project-local configuration from ./uve-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("uve-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        // Try the project root when run through cargo
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("uve-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.max_bursts.is_some() {
            self.max_bursts = other.max_bursts;
        }
        if other.trace_memory.is_some() {
            self.trace_memory = other.trace_memory;
        }
        if other.hexdump_bytes.is_some() {
            self.hexdump_bytes = other.hexdump_bytes;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_value("UVE_EMU_MAX_BURSTS") {
            self.max_bursts = Some(value);
        }
        if let Some(value) = env_value("UVE_EMU_TRACE_MEMORY") {
            self.trace_memory = Some(value);
        }
        if let Some(value) = env_value("UVE_EMU_HEXDUMP_BYTES") {
            self.hexdump_bytes = Some(value);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("uve-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# uve-emu configuration
# Place this file at ~/.config/uve-emu/config.toml or ./uve-emu.toml

# Bursts a `drain` step may run before the stream is reported as stalled
max_bursts = 4096

# Record every memory access and print the log after the report
# trace_memory = true

# Bytes shown per memory region by --dump-memory
# hexdump_bytes = 64
"#
        .to_string()
    }
}

/// Parse an environment variable, warning when it is set but malformed.
fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => {
            log::info!("Using {} from environment: {}", name, raw);
            Some(value)
        }
        Err(_) => {
            log::warn!("Ignoring {}: cannot parse {:?}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_bursts(), 4096);
        assert!(!config.trace_memory());
        assert_eq!(config.hexdump_bytes(), 64);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            max_bursts: Some(10),
            trace_memory: None,
            hexdump_bytes: Some(32),
        };

        let overlay = Config {
            max_bursts: None,
            trace_memory: Some(true),
            hexdump_bytes: Some(128),
        };

        base.merge(overlay);

        // max_bursts unchanged (overlay was None)
        assert_eq!(base.max_bursts, Some(10));
        assert_eq!(base.trace_memory, Some(true));
        assert_eq!(base.hexdump_bytes, Some(128));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.max_bursts(), 4096);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str("trace_memory = true").unwrap();
        assert!(config.trace_memory());
        assert_eq!(config.max_bursts, None);
    }
}
