//! Device recovery pipeline (SPEC_FULL.md §4.6): the ordered healing
//! strategy `ManagedDevice`'s resiliency loop consults when an operation
//! fails.

use crate::bridge::Bridge;
use crate::constants::{RECOVERY_POST_RESET_TIMEOUT, RECOVERY_SETTLE_DELAY, RECOVERY_WAIT_ONLINE_TIMEOUT};
use crate::manager::state_monitor::StateMonitor;
use crate::models::{DeviceState, PoolError, PoolResult, Serial};
use crate::process::ProcessRunner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for [`RecoveryPipeline`], surfaced through [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub settle_delay: Duration,
    pub wait_online_timeout: Duration,
    pub post_reset_timeout: Duration,
    pub min_battery_after_recovery: Option<u32>,
    pub fastboot_path: PathBuf,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            settle_delay: RECOVERY_SETTLE_DELAY,
            wait_online_timeout: RECOVERY_WAIT_ONLINE_TIMEOUT,
            post_reset_timeout: RECOVERY_POST_RESET_TIMEOUT,
            min_battery_after_recovery: None,
            fastboot_path: PathBuf::from("fastboot"),
        }
    }
}

/// Ordered healing strategy consulted by a `ManagedDevice`'s resiliency
/// loop. At most one run per device executes at a time; callers serialize
/// concurrent recovery requests with a per-device lock (see
/// `crate::device::ManagedDevice`).
pub struct RecoveryPipeline {
    bridge: Arc<dyn Bridge>,
    process: Arc<dyn ProcessRunner>,
    config: RecoveryConfig,
}

impl RecoveryPipeline {
    pub fn new(bridge: Arc<dyn Bridge>, process: Arc<dyn ProcessRunner>, config: RecoveryConfig) -> Self {
        Self {
            bridge,
            process,
            config,
        }
    }

    /// Attempts to return `serial` to a usable state. `recover_until_online`
    /// relaxes the end condition from "Available" to "Online" (used by
    /// `ManagedDevice` when `recovery_mode == Online`).
    pub async fn recover(
        &self,
        serial: &Serial,
        monitor: &StateMonitor,
        recover_until_online: bool,
    ) -> PoolResult<()> {
        self.process.sleep(self.config.settle_delay).await;

        // Level-triggered wait for a bootloader-state update; bounded so a
        // device that never emits one doesn't hang recovery forever.
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            monitor.wait_for_bootloader_state_update(),
        )
        .await;

        self.recover_from_state(serial, monitor, monitor.current(), recover_until_online)
            .await?;

        if let Some(min_battery) = self.config.min_battery_after_recovery {
            match self.read_battery(serial).await {
                Some(level) if level >= min_battery => {}
                _ => {
                    return Err(PoolError::device_not_available_because(serial.clone(), "battery"));
                }
            }
        }

        Ok(())
    }

    async fn recover_from_state(
        &self,
        serial: &Serial,
        monitor: &StateMonitor,
        state: DeviceState,
        recover_until_online: bool,
    ) -> PoolResult<()> {
        if state == DeviceState::Available {
            return Ok(());
        }
        if state == DeviceState::Online && recover_until_online {
            return Ok(());
        }

        match state {
            DeviceState::NotAvailable => {
                if monitor.wait_for_online(self.config.wait_online_timeout).await {
                    return Ok(());
                }
                self.reset_usb(serial).await?;
                if monitor.wait_for_online(self.config.post_reset_timeout).await {
                    Ok(())
                } else {
                    Err(PoolError::device_not_available(serial.clone()))
                }
            }
            DeviceState::Recovery => {
                let _ = self.bridge.reboot(serial, None).await;
                let _ = monitor.wait_for_recovery(self.config.wait_online_timeout).await;
                let ok = if recover_until_online {
                    monitor.wait_for_online(self.config.post_reset_timeout).await
                } else {
                    monitor.wait_for_available(self.config.post_reset_timeout).await
                };
                if ok {
                    Ok(())
                } else {
                    Err(PoolError::device_not_available(serial.clone()))
                }
            }
            DeviceState::Sideload => {
                if monitor.wait_for_sideload(self.config.wait_online_timeout).await {
                    Ok(())
                } else {
                    Err(PoolError::device_not_available(serial.clone()))
                }
            }
            DeviceState::Bootloader | DeviceState::Fastbootd => {
                self.fastboot(serial, &["reboot"]).await?;
                if monitor.wait_for_online(self.config.post_reset_timeout).await {
                    Ok(())
                } else {
                    Err(PoolError::device_not_available(serial.clone()))
                }
            }
            DeviceState::Online => {
                if monitor.wait_for_shell(self.config.wait_online_timeout).await {
                    if !recover_until_online && !monitor.wait_for_available(Duration::from_millis(1)).await {
                        return Err(PoolError::device_unresponsive(serial.clone()));
                    }
                    Ok(())
                } else {
                    let _ = self.bridge.reboot(serial, None).await;
                    if monitor.wait_for_online(self.config.post_reset_timeout).await {
                        Ok(())
                    } else {
                        Err(PoolError::device_not_available(serial.clone()))
                    }
                }
            }
            DeviceState::Available => Ok(()),
            DeviceState::Ignored => Err(PoolError::device_not_available(serial.clone())),
        }
    }

    async fn reset_usb(&self, serial: &Serial) -> PoolResult<()> {
        let out = self
            .process
            .run(
                std::path::Path::new("usb_reset"),
                &[serial.as_str()],
                Duration::from_secs(10),
            )
            .await;
        if out.is_success() {
            Ok(())
        } else {
            Err(PoolError::device_not_available(serial.clone()))
        }
    }

    async fn fastboot(&self, serial: &Serial, args: &[&str]) -> PoolResult<()> {
        let mut full_args = vec!["-s", serial.as_str()];
        full_args.extend_from_slice(args);
        let out = self
            .process
            .run(&self.config.fastboot_path, &full_args, Duration::from_secs(15))
            .await;
        if out.is_success() {
            Ok(())
        } else {
            Err(PoolError::device_not_available(serial.clone()))
        }
    }

    /// `fastboot -s <serial> getvar <var>`: fastboot writes `var: value` to
    /// stderr, not stdout.
    async fn fastboot_getvar(&self, serial: &Serial, var: &str) -> Option<String> {
        let out = self
            .process
            .run(
                &self.config.fastboot_path,
                &["-s", serial.as_str(), "getvar", var],
                Duration::from_secs(10),
            )
            .await;
        if !out.is_success() {
            return None;
        }
        out.stderr
            .lines()
            .chain(out.stdout.lines())
            .find_map(|l| l.strip_prefix(&format!("{var}: ")))
            .map(|v| v.trim().to_string())
    }

    /// Waits for bootloader; on miss reboots into bootloader and verifies
    /// via `fastboot getvar product`.
    pub async fn recover_bootloader(&self, serial: &Serial, monitor: &StateMonitor) -> PoolResult<()> {
        if monitor.wait_for_bootloader(Duration::from_secs(5)).await {
            return Ok(());
        }
        let _ = self.bridge.reboot(serial, Some("bootloader")).await;
        if !monitor.wait_for_bootloader(self.config.post_reset_timeout).await {
            return Err(PoolError::device_not_available(serial.clone()));
        }
        match self.fastboot_getvar(serial, "product").await {
            Some(v) if !v.is_empty() => Ok(()),
            _ => Err(PoolError::device_not_available(serial.clone())),
        }
    }

    /// Symmetric to [`Self::recover_bootloader`] for userspace fastboot (fastbootd).
    pub async fn recover_fastbootd(&self, serial: &Serial, monitor: &StateMonitor) -> PoolResult<()> {
        if monitor.current() == DeviceState::Fastbootd {
            return Ok(());
        }
        let _ = self.fastboot(serial, &["reboot-fastboot"]).await;
        let _ = tokio::time::timeout(
            self.config.post_reset_timeout,
            monitor.wait_for_bootloader_state_update(),
        )
        .await;
        if monitor.current() == DeviceState::Fastbootd {
            Ok(())
        } else {
            Err(PoolError::device_not_available(serial.clone()))
        }
    }

    async fn read_battery(&self, serial: &Serial) -> Option<u32> {
        let out = self
            .bridge
            .shell(serial, "dumpsys battery | grep level", Duration::from_secs(5))
            .await
            .ok()?;
        out.split(':').nth(1)?.trim().parse().ok()
    }
}

/// Policy that decides whether a recovery attempt should be skipped
/// outright: fastboot-mode devices and devices with a readable battery are
/// left alone; only an unreadable battery on a non-fastboot device
/// triggers real recovery.
pub struct BatteryUnavailableSkip;

impl BatteryUnavailableSkip {
    pub fn should_skip(state: DeviceState, battery_readable: bool) -> bool {
        matches!(state, DeviceState::Bootloader | DeviceState::Fastbootd) || battery_readable
    }
}
