//! `DeviceManager`: the device registry, bridge listener glue, allocation
//! engine, and placeholder factory (SPEC_FULL.md §4.8).

pub mod allocation_fsm;
pub mod background_action;
pub mod recovery;
pub mod state_monitor;

pub use background_action::BackgroundAction;
pub use recovery::{BatteryUnavailableSkip, RecoveryConfig, RecoveryPipeline};
pub use state_monitor::{AvailabilityCheck, StateMonitor};

use crate::bridge::{Bridge, ChangeKind, Listener};
use crate::config::Config;
use crate::constants::{ARG_DEVICES, DEFAULT_OPERATION_TIMEOUT, EXECUTE_ON_AVAILABLE_MAX_TIMEOUT, SHUTDOWN_TIMEOUT};
use crate::device::{ManagedDevice, RecoveryMode, Selector};
use crate::models::{
    AllocationEvent, AllocationState, DeviceDescriptor, DeviceKind, DeviceState, PoolError, PoolResult, Serial,
};
use crate::process::ProcessRunner;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Produces a fresh [`ManagedDevice`] wired to this manager's bridge,
/// process runner, and recovery pipeline. Supplied at [`DeviceManager::init`]
/// time so tests can inject manageable fakes.
pub type DeviceFactory =
    Arc<dyn Fn(Serial, DeviceKind, bool, DeviceState) -> Arc<ManagedDevice> + Send + Sync>;

/// Observer notified whenever a device's descriptor changes.
#[async_trait]
pub trait DeviceMonitor: Send + Sync {
    async fn on_device_changed(&self, descriptor: &DeviceDescriptor);
}

struct Registry {
    devices: HashMap<Serial, Arc<ManagedDevice>>,
    exclude_filter: Selector,
    include_filter: Selector,
}

pub struct DeviceManager {
    registry: Mutex<Registry>,
    bridge: Arc<dyn Bridge>,
    process: Arc<dyn ProcessRunner>,
    config: Config,
    device_monitors: Mutex<Vec<Arc<dyn DeviceMonitor>>>,
    factory: StdMutex<Option<DeviceFactory>>,
    initialized: AtomicBool,
    adb_bridge_enabled: AtomicBool,
    should_restart_bridge: AtomicBool,
    next_synthetic_id: AtomicU64,
    cancel: CancellationToken,
    listener_id: StdMutex<Option<u64>>,
    poller_handle: StdMutex<Option<JoinHandle<()>>>,
    fastboot_path: StdMutex<PathBuf>,
    extracted_fastboot_dir: StdMutex<Option<PathBuf>>,
}

impl DeviceManager {
    pub fn new(bridge: Arc<dyn Bridge>, process: Arc<dyn ProcessRunner>, config: Config) -> Arc<Self> {
        let fastboot_path = config.fastboot_path.clone();
        Arc::new(Self {
            registry: Mutex::new(Registry {
                devices: HashMap::new(),
                exclude_filter: Selector::default(),
                include_filter: Selector::default(),
            }),
            bridge,
            process,
            config,
            device_monitors: Mutex::new(Vec::new()),
            factory: StdMutex::new(None),
            initialized: AtomicBool::new(false),
            adb_bridge_enabled: AtomicBool::new(true),
            should_restart_bridge: AtomicBool::new(false),
            next_synthetic_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            listener_id: StdMutex::new(None),
            poller_handle: StdMutex::new(None),
            fastboot_path: StdMutex::new(fastboot_path),
            extracted_fastboot_dir: StdMutex::new(None),
        })
    }

    /// Must be set before [`Self::init`] if any serial should never be
    /// allocated.
    pub async fn set_exclude_filter(&self, selector: Selector) {
        self.registry.lock().await.exclude_filter = selector;
    }

    /// Default [`DeviceFactory`] wiring a plain `ManagedDevice` to this
    /// manager's collaborators and `Config`-derived recovery policy.
    pub fn default_factory(self: &Arc<Self>) -> DeviceFactory {
        let bridge = self.bridge.clone();
        let process = self.process.clone();
        let recovery = Arc::new(RecoveryPipeline::new(
            self.bridge.clone(),
            self.process.clone(),
            self.config.recovery_config(),
        ));
        let max_retries = self.config.max_retries;
        let post_boot_commands = self.config.post_boot_commands.clone();
        Arc::new(move |serial, kind, temporary, initial_state| {
            let mut device = ManagedDevice::new(
                serial,
                kind,
                temporary,
                initial_state,
                bridge.clone(),
                process.clone(),
                recovery.clone(),
            );
            device.max_retries = max_retries;
            device.post_boot_commands = post_boot_commands.clone();
            device.recovery_mode = RecoveryMode::Available;
            Arc::new(device)
        })
    }

    /// Mandatory setup: resolves `fastboot_path` (extracting a zip if
    /// configured), registers the bridge listener, and starts the fastboot
    /// poller. Rejects a second call.
    pub async fn init(
        self: &Arc<Self>,
        include_filter: Option<Selector>,
        device_monitors: Vec<Arc<dyn DeviceMonitor>>,
        factory: DeviceFactory,
    ) -> PoolResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(PoolError::illegal_argument("DeviceManager already initialized"));
        }

        if let Some(selector) = include_filter {
            self.registry.lock().await.include_filter = selector;
        }
        *self.factory.lock().unwrap() = Some(factory);
        *self.device_monitors.lock().await = device_monitors;

        {
            let configured = self.fastboot_path.lock().unwrap().clone();
            if configured.extension().map(|e| e == "zip").unwrap_or(false) {
                let (binary, extracted_dir) = extract_fastboot_from_zip(&configured)?;
                *self.fastboot_path.lock().unwrap() = binary;
                *self.extracted_fastboot_dir.lock().unwrap() = Some(extracted_dir);
            }
        }

        let listener: Arc<dyn Listener> = self.clone();
        let id = self.bridge.add_listener(listener).await;
        *self.listener_id.lock().unwrap() = Some(id);

        self.spawn_fastboot_poller();

        Ok(())
    }

    fn spawn_fastboot_poller(self: &Arc<Self>) {
        let manager = self.clone();
        let interval = self.config.fastboot_poll_interval();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                }
                manager.poll_fastboot_devices().await;
            }
        });
        *self.poller_handle.lock().unwrap() = Some(handle);
    }

    async fn poll_fastboot_devices(&self) {
        let path = self.fastboot_path.lock().unwrap().clone();
        let outcome = self.process.run(&path, &[ARG_DEVICES], DEFAULT_OPERATION_TIMEOUT).await;
        if !outcome.is_success() {
            return;
        }
        for line in outcome.stdout.lines() {
            let Some((serial, tag)) = line.split_once('\t') else { continue };
            if tag.trim() != "fastboot" {
                continue;
            }
            let serial = serial.trim().to_string();
            let exists = { self.registry.lock().await.devices.contains_key(&serial) };
            if exists {
                continue;
            }
            let device = self
                .get_or_create_device(&serial, DeviceKind::Physical, false, DeviceState::Bootloader)
                .await;
            device.on_state_observed(DeviceState::Bootloader).await;
        }
    }

    async fn get_or_create_device(
        &self,
        serial: &Serial,
        kind: DeviceKind,
        temporary: bool,
        initial_state: DeviceState,
    ) -> Arc<ManagedDevice> {
        {
            let registry = self.registry.lock().await;
            if let Some(existing) = registry.devices.get(serial) {
                return existing.clone();
            }
        }
        let factory = self
            .factory
            .lock()
            .unwrap()
            .clone()
            .expect("DeviceManager::init must run before devices are created");
        let device = factory(serial.clone(), kind, temporary, initial_state);
        let mut registry = self.registry.lock().await;
        registry
            .devices
            .entry(serial.clone())
            .or_insert(device)
            .clone()
    }

    async fn lookup_device(&self, serial: &Serial) -> Option<Arc<ManagedDevice>> {
        self.registry.lock().await.devices.get(serial).cloned()
    }

    async fn describe(&self, device: &Arc<ManagedDevice>) -> DeviceDescriptor {
        DeviceDescriptor {
            serial: device.serial.clone(),
            kind: device.kind,
            allocation: device.allocation_state().await,
            observed: device.observed_state(),
            product_type: device.product_type().await,
            temporary: device.temporary,
        }
    }

    async fn notify_monitors(&self, device: &Arc<ManagedDevice>) {
        let monitors = self.device_monitors.lock().await;
        if monitors.is_empty() {
            return;
        }
        let descriptor = self.describe(device).await;
        for monitor in monitors.iter() {
            monitor.on_device_changed(&descriptor).await;
        }
    }

    async fn has_placeholder_capacity(&self, kind: DeviceKind) -> bool {
        let limit = match kind {
            DeviceKind::NullPlaceholder => self.config.max_null_devices,
            DeviceKind::Emulator => self.config.max_emulators,
            DeviceKind::TcpNetworked => self.config.max_tcp_devices,
            DeviceKind::RemoteNested => self.config.max_remote_devices,
            _ => return false,
        };
        let registry = self.registry.lock().await;
        let current = registry.devices.values().filter(|d| d.kind == kind).count();
        current < limit
    }

    /// Scans for a matching `Available` device and allocates it, or
    /// synthesizes a placeholder when the selector requests one and
    /// capacity allows.
    pub async fn allocate(self: &Arc<Self>, selector: Selector) -> Option<Arc<ManagedDevice>> {
        let explicit = !selector.serial_includes.is_empty();
        let candidates: Vec<Arc<ManagedDevice>> = {
            let registry = self.registry.lock().await;
            registry.devices.values().cloned().collect()
        };

        for device in &candidates {
            if device.allocation_state().await != AllocationState::Available {
                continue;
            }
            let product_type = device.product_type().await;
            let battery = if selector.min_battery.is_some() {
                device.battery_level().await
            } else {
                None
            };
            let properties = device.properties_snapshot().await;
            if !selector.matches(&device.serial, device.kind, battery, product_type.as_deref(), &properties) {
                continue;
            }
            let event = if explicit {
                AllocationEvent::ExplicitAllocateRequest
            } else {
                AllocationEvent::AllocateRequest
            };
            if device.apply_event(event).await {
                self.notify_monitors(device).await;
                return Some(device.clone());
            }
        }

        if let Some(kind) = selector.requested_placeholder_kind() {
            if self.has_placeholder_capacity(kind).await {
                let serial = selector
                    .serial_includes
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| format!("{kind}-{}", self.next_synthetic_id.fetch_add(1, Ordering::SeqCst)));
                let device = self.get_or_create_device(&serial, kind, true, DeviceState::Available).await;
                device.apply_event(AllocationEvent::ForceAvailable).await;
                if device.apply_event(AllocationEvent::AllocateRequest).await {
                    self.notify_monitors(&device).await;
                    return Some(device);
                }
            }
        }

        None
    }

    pub async fn force_allocate(&self, serial: &Serial) -> Option<Arc<ManagedDevice>> {
        let device = self.lookup_device(serial).await?;
        if device.apply_event(AllocationEvent::ForceAllocateRequest).await {
            self.notify_monitors(&device).await;
            Some(device)
        } else {
            None
        }
    }

    /// Frees `device` back to `final_state`. A temporary placeholder is
    /// removed from the registry once freed. `Ignored` has no dedicated FSM
    /// event (see SPEC_FULL.md §9 open question); it is applied directly.
    pub async fn free(&self, device: Arc<ManagedDevice>, final_state: AllocationState) {
        match final_state {
            AllocationState::Available => {
                device.apply_event(AllocationEvent::FreeAvailable).await;
            }
            AllocationState::Unavailable => {
                device.apply_event(AllocationEvent::FreeUnavailable).await;
            }
            AllocationState::Ignored => {
                device.force_set_allocation_state(AllocationState::Ignored).await;
            }
            _ => {
                device.apply_event(AllocationEvent::FreeUnknown).await;
            }
        }
        self.notify_monitors(&device).await;
        if device.temporary {
            self.registry.lock().await.devices.remove(&device.serial);
        }
    }

    /// Allocated-first, stable by serial within each group.
    pub async fn list_all(&self) -> Vec<DeviceDescriptor> {
        let devices: Vec<Arc<ManagedDevice>> = {
            let registry = self.registry.lock().await;
            registry.devices.values().cloned().collect()
        };
        let mut descriptors = Vec::with_capacity(devices.len());
        for device in &devices {
            descriptors.push(self.describe(device).await);
        }
        descriptors.sort_by(|a, b| {
            let rank = |s: AllocationState| u8::from(s != AllocationState::Allocated);
            rank(a.allocation).cmp(&rank(b.allocation)).then_with(|| a.serial.cmp(&b.serial))
        });
        descriptors
    }

    pub async fn stop_adb_bridge(&self) {
        self.adb_bridge_enabled.store(false, Ordering::SeqCst);
        self.bridge.disconnect().await;
    }

    pub async fn restart_adb_bridge(&self) -> PoolResult<()> {
        self.bridge.restart().await.map_err(|e| PoolError::Io {
            serial: "adb-bridge".to_string(),
            op: "restart".to_string(),
            message: e.to_string(),
        })?;
        self.adb_bridge_enabled.store(true, Ordering::SeqCst);
        self.should_restart_bridge.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn should_adb_bridge_be_restarted(&self) -> bool {
        self.should_restart_bridge.load(Ordering::SeqCst)
    }

    /// Stops the background pollers without tearing down the registry or
    /// bridge listener; a narrower hook than [`Self::terminate`].
    pub async fn terminate_device_monitor(&self) {
        if let Some(handle) = self.poller_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub async fn terminate(&self) {
        self.cancel.cancel();
        let poller = self.poller_handle.lock().unwrap().take();
        if let Some(handle) = poller {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
        }
        let listener_id = self.listener_id.lock().unwrap().take();
        if let Some(id) = listener_id {
            self.bridge.remove_listener(id).await;
        }
        let devices: Vec<Arc<ManagedDevice>> = {
            let mut registry = self.registry.lock().await;
            registry.devices.drain().map(|(_, d)| d).collect()
        };
        for device in devices {
            device.stop_background_action(SHUTDOWN_TIMEOUT).await;
        }
        let extracted_dir = self.extracted_fastboot_dir.lock().unwrap().take();
        if let Some(dir) = extracted_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    /// One-shot utility restricted to already-`Available` devices, capped
    /// at [`EXECUTE_ON_AVAILABLE_MAX_TIMEOUT`].
    pub async fn execute_on_available_device(
        &self,
        serial: &Serial,
        cmd: &str,
        timeout: Duration,
    ) -> PoolResult<String> {
        if timeout > EXECUTE_ON_AVAILABLE_MAX_TIMEOUT {
            return Err(PoolError::illegal_argument(format!(
                "timeout exceeds {} ms",
                EXECUTE_ON_AVAILABLE_MAX_TIMEOUT.as_millis()
            )));
        }
        let device = self
            .lookup_device(serial)
            .await
            .ok_or_else(|| PoolError::device_not_available(serial.clone()))?;
        if device.allocation_state().await != AllocationState::Available {
            return Err(PoolError::device_not_available(serial.clone()));
        }
        device.shell(cmd, timeout).await
    }
}

#[async_trait]
impl Listener for DeviceManager {
    async fn on_connected(&self, serial: &Serial) {
        let device = self
            .get_or_create_device(serial, DeviceKind::Physical, false, DeviceState::Online)
            .await;
        device.on_state_observed(DeviceState::Online).await;
        device.apply_event(AllocationEvent::ConnectedOnline).await;

        let (excluded, included) = {
            let registry = self.registry.lock().await;
            (
                registry.exclude_filter.serial_excludes.contains(serial.as_str()),
                registry.include_filter.matches_serial(serial),
            )
        };

        if excluded || !included {
            device.apply_event(AllocationEvent::AvailableCheckIgnored).await;
            self.notify_monitors(&device).await;
            return;
        }

        let check = device
            .monitor()
            .check_framework_available(
                self.bridge.as_ref(),
                self.config.framework_check_retries,
                self.config.framework_check_default_pass,
                DEFAULT_OPERATION_TIMEOUT,
            )
            .await;

        let event = match check {
            AvailabilityCheck::Passed | AvailabilityCheck::DefaultPassed => AllocationEvent::AvailableCheckPassed,
            AvailabilityCheck::Failed => AllocationEvent::AvailableCheckFailed,
        };
        device.apply_event(event).await;
        self.notify_monitors(&device).await;
    }

    async fn on_changed(&self, serial: &Serial, which: ChangeKind) {
        if which != ChangeKind::State {
            return;
        }
        let Some(device) = self.lookup_device(serial).await else {
            return;
        };
        let observed = self.bridge.get_state(serial).await;
        device.on_state_observed(observed).await;
        let event = match observed {
            DeviceState::Online | DeviceState::Available => AllocationEvent::StateChangeOnline,
            _ => AllocationEvent::StateChangeOffline,
        };
        device.apply_event(event).await;
        self.notify_monitors(&device).await;
    }

    async fn on_disconnected(&self, serial: &Serial) {
        let Some(device) = self.lookup_device(serial).await else {
            return;
        };
        device.on_state_observed(DeviceState::NotAvailable).await;
        device.apply_event(AllocationEvent::Disconnected).await;
        self.notify_monitors(&device).await;
    }
}

/// Extracts the `fastboot` binary from a zip archive into a scoped temp
/// directory released at [`DeviceManager::terminate`].
fn extract_fastboot_from_zip(zip_path: &std::path::Path) -> PoolResult<(PathBuf, PathBuf)> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PoolError::HarnessRuntime { message: format!("opening fastboot zip: {e}") })?;
    let dest_dir = std::env::temp_dir().join(format!("devicepool-fastboot-{}", std::process::id()));
    std::fs::create_dir_all(&dest_dir)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| PoolError::HarnessRuntime { message: format!("reading fastboot zip entry: {e}") })?;
        let name = entry.name().to_string();
        if name.ends_with("fastboot") && !name.ends_with('/') {
            let out_path = dest_dir.join("fastboot");
            let mut out = std::fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = std::fs::metadata(&out_path)?.permissions();
                perms.set_mode(0o755);
                std::fs::set_permissions(&out_path, perms)?;
            }
            return Ok((out_path, dest_dir));
        }
    }

    Err(PoolError::illegal_argument(format!(
        "no fastboot binary found inside {}",
        zip_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::process::mock::MockProcessRunner;

    fn manager(bridge: Arc<MockBridge>, process: Arc<MockProcessRunner>) -> Arc<DeviceManager> {
        DeviceManager::new(bridge, process, Config::default())
    }

    async fn init_manager(manager: &Arc<DeviceManager>) {
        let factory = manager.default_factory();
        manager.init(None, Vec::new(), factory).await.unwrap();
    }

    #[tokio::test]
    async fn second_init_is_rejected() {
        let bridge = Arc::new(MockBridge::new());
        let process = Arc::new(MockProcessRunner::new());
        let mgr = manager(bridge, process);
        init_manager(&mgr).await;
        let factory = mgr.default_factory();
        assert!(mgr.init(None, Vec::new(), factory).await.is_err());
    }

    #[tokio::test]
    async fn connect_check_allocate_then_free_round_trip() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response("S1", "ls /system/bin/pm", Ok("/system/bin/pm"));
        let process = Arc::new(MockProcessRunner::new());
        let mgr = manager(bridge.clone(), process);
        init_manager(&mgr).await;

        bridge.fire_connected("S1").await;

        let device = mgr.allocate(Selector::new()).await.expect("should allocate S1");
        assert_eq!(device.serial, "S1");
        assert_eq!(device.allocation_state().await, AllocationState::Allocated);

        // Reallocating must fail until freed.
        assert!(mgr.allocate(Selector::new()).await.is_none());

        mgr.free(device, AllocationState::Available).await;
        let reallocated = mgr.allocate(Selector::new()).await;
        assert!(reallocated.is_some());
    }

    #[tokio::test]
    async fn excluded_serial_is_driven_to_ignored_and_never_allocated() {
        let bridge = Arc::new(MockBridge::new());
        let process = Arc::new(MockProcessRunner::new());
        let mgr = manager(bridge.clone(), process);
        mgr.set_exclude_filter(Selector::new().excluding_serial("bad1")).await;
        init_manager(&mgr).await;

        bridge.fire_connected("bad1").await;

        assert!(mgr.allocate(Selector::new().with_serial("bad1")).await.is_none());
    }

    #[tokio::test]
    async fn temporary_placeholder_is_synthesized_and_removed_on_free() {
        let bridge = Arc::new(MockBridge::new());
        let process = Arc::new(MockProcessRunner::new());
        let mgr = manager(bridge, process);
        init_manager(&mgr).await;

        let device = mgr
            .allocate(Selector::new().requesting_null_device())
            .await
            .expect("placeholder should synthesize");
        assert_eq!(device.kind, DeviceKind::NullPlaceholder);
        assert!(device.temporary);
        assert_eq!(mgr.list_all().await.len(), 1);

        mgr.free(device, AllocationState::Unknown).await;
        assert_eq!(mgr.list_all().await.len(), 0, "temporary placeholder must be removed on free");
    }

    #[tokio::test]
    async fn list_all_sorts_allocated_first_then_serial() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response("B", "ls /system/bin/pm", Ok("/system/bin/pm"));
        bridge.queue_shell_response("A", "ls /system/bin/pm", Ok("/system/bin/pm"));
        let process = Arc::new(MockProcessRunner::new());
        let mgr = manager(bridge.clone(), process);
        init_manager(&mgr).await;

        bridge.fire_connected("A").await;
        bridge.fire_connected("B").await;

        mgr.force_allocate(&"B".to_string()).await;

        let all = mgr.list_all().await;
        assert_eq!(all[0].serial, "B");
        assert_eq!(all[0].allocation, AllocationState::Allocated);
        assert_eq!(all[1].serial, "A");
    }

    #[tokio::test]
    async fn execute_on_available_device_rejects_oversized_timeout() {
        let bridge = Arc::new(MockBridge::new());
        let process = Arc::new(MockProcessRunner::new());
        let mgr = manager(bridge, process);
        init_manager(&mgr).await;

        let result = mgr
            .execute_on_available_device(&"S1".to_string(), "echo hi", Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(PoolError::IllegalArgument { .. })));
    }
}
