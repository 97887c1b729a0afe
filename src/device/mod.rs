//! `ManagedDevice`: per-device identity, allocation state, and the
//! resiliency loop every shell/sync/reboot call is wrapped in
//! (SPEC_FULL.md §4.5).

pub mod selector;

pub use selector::Selector;

use crate::bridge::{Bridge, BridgeError};
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_OPERATION_TIMEOUT};
use crate::manager::allocation_fsm;
use crate::manager::background_action::{BackgroundAction, OutputSink};
use crate::manager::recovery::RecoveryPipeline;
use crate::manager::state_monitor::StateMonitor;
use crate::models::{AllocationEvent, AllocationState, DeviceKind, DeviceState, PoolError, PoolResult, Serial};
use crate::process::ProcessRunner;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How aggressively the resiliency loop recovers a device before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Recover until the device is fully `Available` and re-run post-boot steps.
    Available,
    /// Recover only until the device is `Online`; good enough for shell I/O.
    Online,
    /// Never recover; surface the first failure.
    None,
}

struct Inner {
    allocation: AllocationState,
    product_type: Option<String>,
    property_cache: HashMap<String, String>,
    fastboot_in_flight: bool,
    background_action: Option<BackgroundAction>,
}

/// One discovered or synthesized device, tracked by the registry in
/// [`crate::manager::DeviceManager`].
pub struct ManagedDevice {
    pub serial: Serial,
    pub kind: DeviceKind,
    pub temporary: bool,
    pub recovery_mode: RecoveryMode,
    pub max_retries: u32,
    pub post_boot_commands: Vec<String>,
    monitor: Arc<StateMonitor>,
    bridge: Arc<dyn Bridge>,
    process: Arc<dyn ProcessRunner>,
    recovery: Arc<RecoveryPipeline>,
    state: Mutex<Inner>,
}

impl ManagedDevice {
    pub fn new(
        serial: Serial,
        kind: DeviceKind,
        temporary: bool,
        initial_state: DeviceState,
        bridge: Arc<dyn Bridge>,
        process: Arc<dyn ProcessRunner>,
        recovery: Arc<RecoveryPipeline>,
    ) -> Self {
        Self {
            monitor: Arc::new(StateMonitor::new(serial.clone(), initial_state)),
            serial,
            kind,
            temporary,
            recovery_mode: RecoveryMode::Available,
            max_retries: DEFAULT_MAX_RETRIES,
            post_boot_commands: Vec::new(),
            bridge,
            process,
            recovery,
            state: Mutex::new(Inner {
                allocation: AllocationState::Unknown,
                product_type: None,
                property_cache: HashMap::new(),
                fastboot_in_flight: false,
                background_action: None,
            }),
        }
    }

    pub fn monitor(&self) -> Arc<StateMonitor> {
        self.monitor.clone()
    }

    pub async fn allocation_state(&self) -> AllocationState {
        self.state.lock().await.allocation
    }

    pub async fn product_type(&self) -> Option<String> {
        self.state.lock().await.product_type.clone()
    }

    pub async fn set_product_type(&self, product_type: Option<String>) {
        self.state.lock().await.product_type = product_type;
    }

    /// Drives the allocation FSM. Never blocks on I/O; safe to call while
    /// holding the registry lock elsewhere (it only touches this device's
    /// own mutex).
    pub async fn apply_event(&self, event: AllocationEvent) -> bool {
        let mut inner = self.state.lock().await;
        let (next, changed) = allocation_fsm::transition(inner.allocation, event);
        inner.allocation = next;
        changed
    }

    /// Bypasses the FSM table to reach `Ignored` on free, which has no
    /// dedicated `Free*` event (SPEC_FULL.md §9 open question).
    pub async fn force_set_allocation_state(&self, state: AllocationState) {
        self.state.lock().await.allocation = state;
    }

    pub fn observed_state(&self) -> DeviceState {
        self.monitor.current()
    }

    /// Called by the bridge listener glue with a freshly observed state.
    /// Suppressed while a fastboot command is in flight, per the fastboot
    /// state gate (SPEC_FULL.md §4.5, §5).
    pub async fn on_state_observed(&self, state: DeviceState) {
        let suppress = {
            let inner = self.state.lock().await;
            inner.fastboot_in_flight && state == DeviceState::NotAvailable
        };
        if !suppress {
            self.monitor.set_state(state);
        }
    }

    /// Runs `f`, a fastboot-class operation, under the fastboot exclusion
    /// gate: external downgrade notifications are coalesced for its
    /// duration, and the device's observed state is re-read from the
    /// bridge (not replayed events) once it returns.
    pub async fn with_fastboot_gate<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut inner = self.state.lock().await;
            inner.fastboot_in_flight = true;
        }
        let result = f().await;
        {
            let mut inner = self.state.lock().await;
            inner.fastboot_in_flight = false;
        }
        let observed = self.bridge.get_state(&self.serial).await;
        self.monitor.set_state(observed);
        result
    }

    /// Property cache: `getprop` results are memoized until a reboot or
    /// explicit invalidation.
    pub async fn getprop(&self, name: &str) -> PoolResult<String> {
        if let Some(cached) = self.state.lock().await.property_cache.get(name) {
            return Ok(cached.clone());
        }
        let value = self
            .execute_resilient("getprop", || {
                self.bridge
                    .shell(&self.serial, &format!("getprop {name}"), DEFAULT_OPERATION_TIMEOUT)
            })
            .await?;
        let trimmed = value.trim().to_string();
        self.state
            .lock()
            .await
            .property_cache
            .insert(name.to_string(), trimmed.clone());
        Ok(trimmed)
    }

    pub async fn invalidate_property_cache(&self) {
        self.state.lock().await.property_cache.clear();
    }

    /// The cached `getprop` snapshot, for `Selector::extra_properties`
    /// matching. Only properties already fetched via [`Self::getprop`] are
    /// present; this never triggers a shell call on its own.
    pub async fn properties_snapshot(&self) -> HashMap<String, String> {
        self.state.lock().await.property_cache.clone()
    }

    /// Reads the current battery level via `dumpsys battery`, for
    /// `Selector::min_battery` matching. Not cached: battery drains over
    /// time, so a stale reading would be actively misleading.
    pub async fn battery_level(&self) -> Option<u32> {
        let out = self
            .bridge
            .shell(&self.serial, "dumpsys battery | grep level", Duration::from_secs(5))
            .await
            .ok()?;
        out.split(':').nth(1)?.trim().parse().ok()
    }

    pub async fn shell(&self, cmd: &str, timeout: Duration) -> PoolResult<String> {
        self.execute_resilient("shell", || self.bridge.shell(&self.serial, cmd, timeout))
            .await
    }

    pub async fn reboot(&self, target: Option<&str>) -> PoolResult<()> {
        let target_owned = target.map(|s| s.to_string());
        let result = self
            .execute_resilient("reboot", || {
                self.bridge.reboot(&self.serial, target_owned.as_deref())
            })
            .await;
        self.invalidate_property_cache().await;
        result
    }

    pub async fn sync_push(&self, local: &str, remote: &str) -> PoolResult<()> {
        self.execute_resilient("sync_push", || self.bridge.sync_push(&self.serial, local, remote))
            .await
    }

    pub async fn sync_pull(&self, remote: &str, local: &str) -> PoolResult<()> {
        self.execute_resilient("sync_pull", || self.bridge.sync_pull(&self.serial, remote, local))
            .await
    }

    /// The resiliency loop every shell/sync/reboot call goes through.
    /// Retry count **includes** the first attempt: `max_retries + 1` total
    /// attempts before surfacing `DeviceUnresponsive`.
    async fn execute_resilient<T, F, Fut>(&self, op: &str, mut f: F) -> PoolResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        for attempt in 0..=self.max_retries {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if Self::is_recoverable(&err) => {
                    if attempt == self.max_retries || self.recovery_mode == RecoveryMode::None {
                        return Err(PoolError::device_unresponsive(self.serial.clone()));
                    }
                    log::warn!("{op} on {} hit {err}; attempting recovery", self.serial);
                    self.recovery
                        .recover(&self.serial, &self.monitor, self.recovery_mode == RecoveryMode::Online)
                        .await?;
                    if self.recovery_mode == RecoveryMode::Available {
                        self.run_post_boot_steps().await;
                    }
                }
                Err(err) => return Err(Self::bridge_err_to_pool_err(&self.serial, op, err)),
            }
        }
        unreachable!("loop always returns by the final attempt")
    }

    fn is_recoverable(err: &BridgeError) -> bool {
        matches!(
            err,
            BridgeError::Io { .. } | BridgeError::TimedOut { .. } | BridgeError::Unresponsive { .. }
        )
    }

    fn bridge_err_to_pool_err(serial: &Serial, op: &str, err: BridgeError) -> PoolError {
        match err {
            BridgeError::AdbRejected { message, .. } => PoolError::Io {
                serial: serial.clone(),
                op: op.to_string(),
                message,
            },
            other => PoolError::Io {
                serial: serial.clone(),
                op: op.to_string(),
                message: other.to_string(),
            },
        }
    }

    async fn run_post_boot_steps(&self) {
        for cmd in &self.post_boot_commands {
            let _ = self.bridge.shell(&self.serial, cmd, DEFAULT_OPERATION_TIMEOUT).await;
        }
    }

    /// Starts a background action if none is currently alive.
    pub async fn start_background_action(
        &self,
        cmd: String,
        sink: OutputSink,
        log_start_delay: Duration,
    ) -> PoolResult<()> {
        let mut inner = self.state.lock().await;
        if let Some(existing) = &inner.background_action {
            if existing.is_alive() {
                return Err(PoolError::illegal_argument(format!(
                    "{} already has a background action running",
                    self.serial
                )));
            }
        }
        inner.background_action = Some(BackgroundAction::start(
            self.serial.clone(),
            cmd,
            self.bridge.clone(),
            self.monitor.clone(),
            sink,
            log_start_delay,
        ));
        Ok(())
    }

    pub async fn stop_background_action(&self, timeout: Duration) -> bool {
        let mut inner = self.state.lock().await;
        if let Some(mut action) = inner.background_action.take() {
            action.cancel();
            action.join(timeout).await
        } else {
            true
        }
    }

    pub async fn background_action_alive(&self) -> bool {
        self.state
            .lock()
            .await
            .background_action
            .as_ref()
            .map(|a| a.is_alive())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::manager::recovery::RecoveryConfig;
    use crate::process::mock::MockProcessRunner;

    fn device(bridge: Arc<MockBridge>, process: Arc<MockProcessRunner>) -> ManagedDevice {
        let recovery = Arc::new(RecoveryPipeline::new(bridge.clone(), process.clone(), RecoveryConfig::default()));
        ManagedDevice::new(
            "S1".to_string(),
            DeviceKind::Physical,
            false,
            DeviceState::Available,
            bridge,
            process,
            recovery,
        )
    }

    #[tokio::test]
    async fn shell_succeeds_without_retry_on_first_try() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response("S1", "echo hi", Ok("hi"));
        let process = Arc::new(MockProcessRunner::new());
        let dev = device(bridge.clone(), process);

        let out = dev.shell("echo hi", Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, "hi");
        assert_eq!(bridge.shell_call_count("S1"), 1);
    }

    #[tokio::test]
    async fn shell_exhausts_retries_then_raises_unresponsive() {
        let bridge = Arc::new(MockBridge::new());
        for _ in 0..=DEFAULT_MAX_RETRIES {
            bridge.queue_shell_response(
                "S1",
                "flaky",
                Err(BridgeError::Io {
                    serial: "S1".into(),
                    message: "broken pipe".into(),
                }),
            );
        }
        let process = Arc::new(MockProcessRunner::new());
        let mut dev = device(bridge.clone(), process);
        dev.recovery_mode = RecoveryMode::Online;

        let result = dev.shell("flaky", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PoolError::DeviceUnresponsive { .. })));
        assert_eq!(bridge.shell_call_count("S1"), (DEFAULT_MAX_RETRIES + 1) as usize);
    }

    #[tokio::test]
    async fn property_cache_is_memoized_until_invalidated() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response("S1", "getprop ro.build.type", Ok("userdebug\n"));
        let process = Arc::new(MockProcessRunner::new());
        let dev = device(bridge.clone(), process);

        let first = dev.getprop("ro.build.type").await.unwrap();
        let second = dev.getprop("ro.build.type").await.unwrap();
        assert_eq!(first, "userdebug");
        assert_eq!(second, "userdebug");
        assert_eq!(bridge.shell_call_count("S1"), 1, "second call must hit the cache");

        dev.invalidate_property_cache().await;
        bridge.queue_shell_response("S1", "getprop ro.build.type", Ok("user\n"));
        let third = dev.getprop("ro.build.type").await.unwrap();
        assert_eq!(third, "user");
    }

    #[tokio::test]
    async fn fastboot_gate_suppresses_external_not_available_then_re_reads() {
        let bridge = Arc::new(MockBridge::new());
        bridge.set_state("S1", DeviceState::Bootloader);
        let process = Arc::new(MockProcessRunner::new());
        let dev = device(bridge.clone(), process);

        dev.on_state_observed(DeviceState::Bootloader).await;
        assert_eq!(dev.observed_state(), DeviceState::Bootloader);

        dev.with_fastboot_gate(|| async {
            // While in-flight, a stray disconnect notification is dropped.
            dev.on_state_observed(DeviceState::NotAvailable).await;
            assert_eq!(dev.observed_state(), DeviceState::Bootloader);
        })
        .await;

        // After the gated call returns, state is re-read from the bridge.
        assert_eq!(dev.observed_state(), DeviceState::Bootloader);
    }

    #[tokio::test]
    async fn background_action_rejects_a_second_concurrent_start() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response("S1", "logcat -v threadtime", Ok("line"));
        let process = Arc::new(MockProcessRunner::new());
        let dev = device(bridge, process);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        dev.start_background_action("logcat -v threadtime".to_string(), tx, Duration::ZERO)
            .await
            .unwrap();

        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        let second = dev
            .start_background_action("logcat -v threadtime".to_string(), tx2, Duration::ZERO)
            .await;
        assert!(second.is_err());

        dev.stop_background_action(Duration::from_secs(5)).await;
    }
}
