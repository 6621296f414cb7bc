//! Harness configuration.
//! Values come from the environment (optionally seeded from a `.env` file) and
//! are passed explicitly to a `ScenarioContext`; nothing here is global.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarnessError, Result};

pub const DEFAULT_BIN_DIR: &str = "bin";
pub const DEFAULT_BINARY_NAME: &str = "bugsnag-cli";
pub const DEFAULT_VERSION_SOURCE: &str = "main.go";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Directory holding the platform binaries, relative to `work_dir`.
    pub bin_dir: PathBuf,
    pub binary_base_name: String,
    pub work_dir: PathBuf,
    /// Key every upload must carry.
    pub api_key: Option<String>,
    /// None blocks until the child exits.
    pub command_timeout: Option<Duration>,
    pub version_source: PathBuf,
    /// Where the mock server dumps received requests.
    pub requests_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            bin_dir: PathBuf::from(DEFAULT_BIN_DIR),
            binary_base_name: DEFAULT_BINARY_NAME.to_string(),
            work_dir: PathBuf::from("."),
            api_key: None,
            command_timeout: None,
            version_source: PathBuf::from(DEFAULT_VERSION_SOURCE),
            requests_dir: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = HarnessConfig::default();

        let command_timeout = match get("HARNESS_COMMAND_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e| {
                    HarnessError::Config(format!("HARNESS_COMMAND_TIMEOUT_SECS={raw:?}: {e}"))
                })?;
                if secs == 0 {
                    return Err(HarnessError::Config(
                        "HARNESS_COMMAND_TIMEOUT_SECS must be greater than zero".to_string(),
                    ));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(HarnessConfig {
            bin_dir: get("HARNESS_BIN_DIR").map(PathBuf::from).unwrap_or(defaults.bin_dir),
            binary_base_name: get("HARNESS_BINARY_NAME").unwrap_or(defaults.binary_base_name),
            work_dir: get("HARNESS_WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir),
            api_key: get("HARNESS_API_KEY"),
            command_timeout,
            version_source: get("HARNESS_VERSION_SOURCE")
                .map(PathBuf::from)
                .unwrap_or(defaults.version_source),
            requests_dir: get("HARNESS_REQUESTS_DIR").map(PathBuf::from),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| HarnessError::Config("HARNESS_API_KEY is not set".to_string()))
    }
}
