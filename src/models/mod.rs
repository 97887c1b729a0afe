//! Core data structures and domain models.

pub mod descriptor;
pub mod error;

pub use descriptor::{AllocationEvent, AllocationState, DeviceDescriptor, DeviceKind, DeviceState, Serial};
pub use error::{PoolError, PoolResult};
