//! Adapter configuration loaded from YAML.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::force_level3_from_env;
use crate::watchdog::{AbortPolicy, DEFAULT_TIMEOUT};

/// Name of the watchdog flag file inside the device files directory.
pub const FAILURE_FILE_NAME: &str = "l3_failure_file";
/// Directory used for the flag file when no base path is configured.
pub const DEFAULT_DEVICE_FILES_PATH: &str = "/data";

fn default_watchdog_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

/// Where to find the Level 1 module and its provisioning material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Vendor Level 1 shared library. Without one only Level 3 is used.
    #[serde(default)]
    pub l1_library_path: Option<PathBuf>,
    /// Factory keybox installed when the module has neither a valid keybox
    /// nor a certificate.
    #[serde(default)]
    pub factory_keybox_path: Option<PathBuf>,
    /// Directory holding per-device files such as the watchdog flag.
    #[serde(default)]
    pub device_files_base_path: Option<PathBuf>,
    /// Deadline for Level 3 bring-up.
    #[serde(default = "default_watchdog_timeout_secs")]
    pub watchdog_timeout_secs: u64,
    /// Use Level 3 only. `FORCE_LEVEL3_OEMCRYPTO=yes` has the same effect.
    #[serde(default)]
    pub force_level3: bool,
    #[serde(default)]
    pub abort_policy: AbortPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            l1_library_path: None,
            factory_keybox_path: None,
            device_files_base_path: None,
            watchdog_timeout_secs: default_watchdog_timeout_secs(),
            force_level3: false,
            abort_policy: AbortPolicy::default(),
        }
    }
}

impl AdapterConfig {
    /// Load a configuration from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data)?;
        if config.watchdog_timeout_secs == 0 {
            return Err(Error::Config("watchdog_timeout_secs must be positive".to_string()));
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_l1_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.l1_library_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_factory_keybox(mut self, path: impl Into<PathBuf>) -> Self {
        self.factory_keybox_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_device_files(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_files_base_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn with_force_level3(mut self, force: bool) -> Self {
        self.force_level3 = force;
        self
    }

    #[must_use]
    pub fn with_abort_policy(mut self, policy: AbortPolicy) -> Self {
        self.abort_policy = policy;
        self
    }

    #[must_use]
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    /// Location of the watchdog flag file.
    #[must_use]
    pub fn failure_file_path(&self) -> PathBuf {
        self.device_files_base_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_DEVICE_FILES_PATH))
            .join(FAILURE_FILE_NAME)
    }

    /// Whether Level 3 is forced, by configuration or environment.
    #[must_use]
    pub fn level3_forced(&self) -> bool {
        self.force_level3 || force_level3_from_env()
    }
}
