//! Core enums and the externally-visible device snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device identifier, unique key into the [`crate::manager::DeviceManager`] registry.
pub type Serial = String;

/// Gates which selector requests a device satisfies and which operations it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Physical,
    Emulator,
    NullPlaceholder,
    TcpNetworked,
    RemoteNested,
    Stub,
}

impl DeviceKind {
    /// Placeholder kinds are synthesized by the manager's factory rather than discovered.
    pub fn is_placeholder(self) -> bool {
        matches!(
            self,
            Self::NullPlaceholder | Self::Emulator | Self::Stub | Self::TcpNetworked | Self::RemoteNested
        )
    }

    /// Fastboot is meaningless against a device kind with no bootloader concept.
    pub fn supports_fastboot(self) -> bool {
        matches!(self, Self::Physical | Self::Emulator)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Physical => "physical",
            Self::Emulator => "emulator",
            Self::NullPlaceholder => "null-placeholder",
            Self::TcpNetworked => "tcp-networked",
            Self::RemoteNested => "remote-nested",
            Self::Stub => "stub",
        };
        f.write_str(s)
    }
}

/// Observable device state, maintained by the [`crate::manager::StateMonitor`]
/// from bridge notifications plus polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    NotAvailable,
    Online,
    Available,
    Bootloader,
    Fastbootd,
    Recovery,
    Sideload,
    Ignored,
}

/// Authoritative allocation state, owned by the [`crate::manager::AllocationFsm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Unknown,
    CheckingAvailability,
    Available,
    Allocated,
    Unavailable,
    Ignored,
}

/// Events accepted by the allocation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationEvent {
    ConnectedOnline,
    ConnectedOffline,
    StateChangeOnline,
    StateChangeOffline,
    AvailableCheckPassed,
    AvailableCheckFailed,
    AvailableCheckIgnored,
    ExplicitAllocateRequest,
    AllocateRequest,
    ForceAllocateRequest,
    FreeAvailable,
    FreeUnavailable,
    FreeUnknown,
    ForceAvailable,
    Disconnected,
}

/// Immutable snapshot of a [`crate::device::ManagedDevice`]'s externally
/// visible attributes, used by `DeviceManager::list_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub serial: Serial,
    pub kind: DeviceKind,
    pub allocation: AllocationState,
    pub observed: DeviceState,
    pub product_type: Option<String>,
    pub temporary: bool,
}
