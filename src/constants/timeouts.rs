//! Timeout and delay constants for device operations.

use std::time::Duration;

/// Default shell/sync/reboot call timeout.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// `execute_on_available_device` refuses any timeout above this.
pub const EXECUTE_ON_AVAILABLE_MAX_TIMEOUT: Duration = Duration::from_millis(1000);

/// Recovery pipeline's initial settle sleep before inspecting device state.
pub const RECOVERY_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Wait-for-online budget inside recovery before attempting a USB reset.
pub const RECOVERY_WAIT_ONLINE_TIMEOUT: Duration = Duration::from_secs(20);

/// Wait-for-online budget after a USB reset or fastboot reboot.
pub const RECOVERY_POST_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff between framework-availability shell probes.
pub const FRAMEWORK_CHECK_BACKOFF: Duration = Duration::from_millis(500);

/// Fastboot poller tick interval (`fastboot devices`).
pub const FASTBOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Ambient shutdown timeout: no suspension point may outlive this once
/// cancellation has been requested.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
