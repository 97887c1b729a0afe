//! devicepool - Device pool manager for an on-host Android-like test harness.
//!
//! This library discovers attached devices, drives each through an
//! allocation lifecycle (connected → checking availability → available →
//! allocated → freed), hands out devices matching a caller's selector, and
//! keeps every device healthy via a recovery pipeline that handles
//! adb/fastboot/bootloader/offline/unresponsive transitions.
//!
//! # Architecture Overview
//!
//! - [`bridge`] - the adb connection collaborator contract and its mock
//! - [`device`] - `ManagedDevice`'s resiliency loop, property cache, and `Selector`
//! - [`manager`] - `DeviceManager` registry, the allocation FSM, `StateMonitor`,
//!   `RecoveryPipeline`, and `BackgroundAction`
//! - [`models`] - core data structures, domain enums, and `PoolError`
//! - [`process`] - the subprocess execution abstraction (adb, fastboot)
//! - [`config`] - `Config` loading from `~/.config/devicepool/config.toml`
//!
//! # Usage
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use devicepool::{Config, DeviceManager};
//! use devicepool::process::TokioProcessRunner;
//! use std::sync::Arc;
//!
//! let config = Config::load(None)?;
//! // `bridge` would be a real adb client adapter; omitted here.
//! # let bridge: Arc<dyn devicepool::bridge::Bridge> = unimplemented!();
//! let process = Arc::new(TokioProcessRunner::new());
//! let manager = DeviceManager::new(bridge, process, config);
//! let factory = manager.default_factory();
//! manager.init(None, Vec::new(), factory).await?;
//! # Ok(())
//! # }
//! ```

/// The `Bridge` collaborator contract: adb connection events and per-device
/// shell/sync/reboot/state operations.
pub mod bridge;

/// Pool-manager-wide constants: timeouts, defaults, and adb/fastboot
/// command fragments.
pub mod constants;

/// Configuration loading (`serde` + `toml`).
pub mod config;

/// `ManagedDevice`'s resiliency loop, property cache, and device selection.
pub mod device;

/// `DeviceManager` registry, the allocation state machine, `StateMonitor`,
/// `RecoveryPipeline`, and `BackgroundAction`.
pub mod manager;

/// Core data structures and domain models.
pub mod models;

/// Process execution abstraction for testability (adb, fastboot).
pub mod process;

pub use config::Config;
pub use device::{ManagedDevice, Selector};
pub use manager::DeviceManager;
pub use models::{AllocationEvent, AllocationState, DeviceDescriptor, DeviceKind, DeviceState, PoolError, PoolResult, Serial};
