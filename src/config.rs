//! Configuration (SPEC_FULL.md §4.9): `serde` + `toml`, loaded from
//! `~/.config/devicepool/config.toml` or an explicit path, falling back to
//! sensible defaults when absent.

use crate::constants::{
    DEFAULT_FRAMEWORK_CHECK_DEFAULT_PASS, DEFAULT_FRAMEWORK_CHECK_RETRIES, DEFAULT_MAX_EMULATORS,
    DEFAULT_MAX_GCE_DEVICES, DEFAULT_MAX_NULL_DEVICES, DEFAULT_MAX_REMOTE_DEVICES, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_TCP_DEVICES, FASTBOOT_POLL_INTERVAL, RECOVERY_POST_RESET_TIMEOUT, RECOVERY_SETTLE_DELAY,
    RECOVERY_WAIT_ONLINE_TIMEOUT,
};
use crate::manager::recovery::RecoveryConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Pool-manager-wide tunables, mirrored into [`RecoveryConfig`] at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Placeholder-device capacity limits (SPEC_FULL.md §4.8).
    pub max_emulators: usize,
    pub max_null_devices: usize,
    pub max_tcp_devices: usize,
    pub max_gce_devices: usize,
    pub max_remote_devices: usize,

    /// Resiliency loop retry count, excluding the first attempt.
    pub max_retries: u32,

    /// Framework-availability probe tunables (SPEC_FULL.md §4.3).
    pub framework_check_retries: u32,
    pub framework_check_default_pass: bool,

    /// Minimum battery percentage required after a recovery run; `None`
    /// disables the check.
    pub min_battery_after_recovery: Option<u32>,

    /// Either a `fastboot` binary/directory, or a zip archive containing
    /// one (extracted at `DeviceManager::init`).
    pub fastboot_path: PathBuf,

    /// Shell commands run once after every successful recovery when
    /// `recovery_mode == Available` (dismiss keyguard, sanity-check input).
    pub post_boot_commands: Vec<String>,

    /// `fastboot devices` poll cadence, in seconds.
    pub fastboot_poll_seconds: u64,
}

impl Config {
    /// Reads `path`, or `~/.config/devicepool/config.toml` if `path` is
    /// `None`, falling back to [`Config::default`] when neither exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p),
            None => dirs::config_dir().map(|dir| dir.join("devicepool").join("config.toml")),
        };

        match resolved {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("reading config file at {}", p.display()))?;
                let config: Config =
                    toml::from_str(&text).with_context(|| format!("parsing config file at {}", p.display()))?;
                Ok(config)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            settle_delay: RECOVERY_SETTLE_DELAY,
            wait_online_timeout: RECOVERY_WAIT_ONLINE_TIMEOUT,
            post_reset_timeout: RECOVERY_POST_RESET_TIMEOUT,
            min_battery_after_recovery: self.min_battery_after_recovery,
            fastboot_path: self.fastboot_path.clone(),
        }
    }

    pub fn fastboot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fastboot_poll_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_emulators: DEFAULT_MAX_EMULATORS,
            max_null_devices: DEFAULT_MAX_NULL_DEVICES,
            max_tcp_devices: DEFAULT_MAX_TCP_DEVICES,
            max_gce_devices: DEFAULT_MAX_GCE_DEVICES,
            max_remote_devices: DEFAULT_MAX_REMOTE_DEVICES,
            max_retries: DEFAULT_MAX_RETRIES,
            framework_check_retries: DEFAULT_FRAMEWORK_CHECK_RETRIES,
            framework_check_default_pass: DEFAULT_FRAMEWORK_CHECK_DEFAULT_PASS,
            min_battery_after_recovery: None,
            fastboot_path: PathBuf::from("fastboot"),
            post_boot_commands: Vec::new(),
            fastboot_poll_seconds: FASTBOOT_POLL_INTERVAL.as_secs(),
        }
    }
}
