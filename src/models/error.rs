//! Error types

use thiserror::Error;

/// Failure kinds surfaced by the device pool manager.
///
/// `Io`, `TimedOut` and `DeviceUnresponsive` are retryable inside the
/// resiliency loop (see [`crate::device`]); `UnsupportedOperation` and
/// `IllegalArgument` bypass it entirely.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("device not available: {serial}{}", reason.as_ref().map(|r| format!(" ({r})")).unwrap_or_default())]
    DeviceNotAvailable {
        serial: String,
        reason: Option<String>,
    },

    #[error("device unresponsive: {serial}")]
    DeviceUnresponsive { serial: String },

    #[error("operation '{op}' on {serial} timed out after {timeout_ms}ms")]
    TimedOut {
        serial: String,
        op: String,
        timeout_ms: u64,
    },

    #[error("I/O error on {serial} during '{op}': {message}")]
    Io {
        serial: String,
        op: String,
        message: String,
    },

    #[error("unsupported operation '{op}' for device kind {kind}")]
    UnsupportedOperation { op: String, kind: String },

    #[error("illegal argument: {message}")]
    IllegalArgument { message: String },

    #[error("internal invariant violation: {message}")]
    HarnessRuntime { message: String },

    #[error("I/O error: {0}")]
    StdIo(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

impl PoolError {
    pub fn device_not_available(serial: impl Into<String>) -> Self {
        Self::DeviceNotAvailable {
            serial: serial.into(),
            reason: None,
        }
    }

    pub fn device_not_available_because(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceNotAvailable {
            serial: serial.into(),
            reason: Some(reason.into()),
        }
    }

    pub fn device_unresponsive(serial: impl Into<String>) -> Self {
        Self::DeviceUnresponsive {
            serial: serial.into(),
        }
    }

    pub fn unsupported(op: impl Into<String>, kind: impl std::fmt::Display) -> Self {
        Self::UnsupportedOperation {
            op: op.into(),
            kind: kind.to_string(),
        }
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Whether the resiliency loop should retry-and-recover this error, as
    /// opposed to surfacing it immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::TimedOut { .. })
    }

    /// Operator-facing one-liner; does not replace structured logging, only
    /// summarizes for a CLI or notification surface.
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::DeviceNotAvailable { serial, reason } => match reason {
                Some(r) => format!("Device '{serial}' is not available ({r})"),
                None => format!("Device '{serial}' is not available"),
            },
            Self::DeviceUnresponsive { serial } => {
                format!("Device '{serial}' stopped responding")
            }
            Self::TimedOut { serial, op, .. } => format!("'{op}' on '{serial}' timed out"),
            Self::Io { serial, op, .. } => format!("I/O error running '{op}' on '{serial}'"),
            Self::UnsupportedOperation { op, kind } => {
                format!("'{op}' is not supported on device kind {kind}")
            }
            Self::IllegalArgument { message } => format!("Invalid argument: {message}"),
            Self::HarnessRuntime { message } => format!("Internal error: {message}"),
            Self::StdIo(e) => format!("I/O error: {e}"),
            Self::Config(e) => format!("Configuration error: {e}"),
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
