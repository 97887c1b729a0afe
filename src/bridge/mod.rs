//! The `Bridge` collaborator contract (SPEC_FULL.md §4.2).
//!
//! `Bridge` abstracts over the adb connection library this crate does not
//! implement: it publishes connected/changed/disconnected events to
//! registered [`Listener`]s and exposes per-device shell/sync/reboot/state
//! operations. Production wiring would adapt a real adb client; tests use
//! [`mock::MockBridge`].

pub mod mock;

use crate::models::{DeviceState, Serial};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds a [`Bridge`] per-device operation may raise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("I/O error talking to {serial}: {message}")]
    Io { serial: Serial, message: String },

    #[error("adb rejected command on {serial}: {message}")]
    AdbRejected { serial: Serial, message: String },

    #[error("operation on {serial} timed out")]
    TimedOut { serial: Serial },

    #[error("{serial} is unresponsive")]
    Unresponsive { serial: Serial },
}

impl BridgeError {
    pub fn serial(&self) -> &str {
        match self {
            Self::Io { serial, .. }
            | Self::AdbRejected { serial, .. }
            | Self::TimedOut { serial }
            | Self::Unresponsive { serial } => serial,
        }
    }
}

/// What changed in an `on_changed` notification. The bridge this crate
/// models only ever raises state changes; the enum leaves room for a real
/// adb library's richer change mask without widening the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    State,
}

/// Bridge event listener. `DeviceManager` is the only production
/// implementation; tests may register their own to assert dispatch order.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_connected(&self, serial: &Serial);
    async fn on_changed(&self, serial: &Serial, which: ChangeKind);
    async fn on_disconnected(&self, serial: &Serial);
}

/// Handle over the (external, out of scope) adb connection.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Registers a listener, returning an opaque id usable with `remove_listener`.
    async fn add_listener(&self, listener: std::sync::Arc<dyn Listener>) -> u64;
    async fn remove_listener(&self, id: u64);

    /// Restarts the underlying adb server.
    async fn restart(&self) -> Result<(), BridgeError>;
    /// Disconnects from the adb server without restarting it.
    async fn disconnect(&self);

    async fn shell(&self, serial: &Serial, cmd: &str, timeout: Duration) -> Result<String, BridgeError>;
    async fn reboot(&self, serial: &Serial, target: Option<&str>) -> Result<(), BridgeError>;
    async fn sync_push(&self, serial: &Serial, local: &str, remote: &str) -> Result<(), BridgeError>;
    async fn sync_pull(&self, serial: &Serial, remote: &str, local: &str) -> Result<(), BridgeError>;
    async fn get_state(&self, serial: &Serial) -> DeviceState;
}
