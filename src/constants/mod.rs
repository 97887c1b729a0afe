//! Pool-manager-wide constants: timeouts, defaults, and adb/fastboot command
//! fragments, split by concern across a few small files rather than one
//! grab-bag module.

pub mod commands;
pub mod defaults;
pub mod timeouts;

pub use commands::*;
pub use defaults::*;
pub use timeouts::*;
