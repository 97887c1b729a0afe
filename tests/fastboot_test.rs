//! Fastboot-specific paths: the background poller discovering a
//! bootloader-mode device from `fastboot devices`, and the recovery
//! pipeline's reboot-from-bootloader branch.

use devicepool::bridge::mock::MockBridge;
use devicepool::bridge::BridgeError;
use devicepool::models::DeviceState;
use devicepool::process::mock::MockProcessRunner;
use devicepool::{AllocationState, Config, DeviceManager, Selector};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn fastboot_poller_discovers_a_bootloader_device() {
    let bridge = Arc::new(MockBridge::new());
    let process = Arc::new(
        MockProcessRunner::new().with_success("fastboot", &["devices"], "F1\tfastboot\n"),
    );
    let mut config = Config::default();
    config.fastboot_poll_seconds = 0;
    let mgr = DeviceManager::new(bridge, process.clone(), config);
    let factory = mgr.default_factory();
    mgr.init(None, Vec::new(), factory).await.unwrap();

    // Give the background poller a few ticks to run against the mocked
    // `fastboot devices` output.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let all = mgr.list_all().await;
    let f1 = all.iter().find(|d| d.serial == "F1").expect("F1 should be discovered by the poller");
    assert_eq!(f1.observed, DeviceState::Bootloader);
    assert!(process.call_count("fastboot") >= 1);
}

#[tokio::test]
async fn recovery_reboots_a_device_stuck_in_bootloader() {
    let bridge = Arc::new(MockBridge::new());
    bridge.queue_shell_response("S1", "ls /system/bin/pm", Ok("/system/bin/pm"));
    bridge.queue_shell_response(
        "S1",
        "getprop sys.boot_completed",
        Err(BridgeError::Io {
            serial: "S1".into(),
            message: "device in bootloader".into(),
        }),
    );
    let process = Arc::new(
        MockProcessRunner::new().with_success("fastboot", &["-s", "S1", "reboot"], ""),
    );
    let mgr = DeviceManager::new(bridge.clone(), process.clone(), Config::default());
    let factory = mgr.default_factory();
    mgr.init(None, Vec::new(), factory).await.unwrap();

    bridge.fire_connected("S1").await;
    let device = mgr.allocate(Selector::new()).await.expect("S1 should allocate");
    bridge.fire_changed("S1", DeviceState::Bootloader).await;

    let bridge2 = bridge.clone();
    tokio::spawn(async move {
        // Past the recovery pipeline's fixed bootloader-wait bound, then
        // past its `fastboot reboot` call: let the device come back online.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        bridge2.fire_changed("S1", DeviceState::Online).await;
    });

    let result = device.shell("getprop sys.boot_completed", Duration::from_secs(10)).await;
    assert!(result.is_ok(), "recovery should reboot out of bootloader and the retried shell should succeed");
    assert_eq!(process.call_count("fastboot"), 1);
    // The bootloader drop and the later online bounce are both observed as
    // ordinary state changes; the allocation handle the caller already holds
    // is untouched by either.
    assert_eq!(device.allocation_state().await, AllocationState::Available);
}
