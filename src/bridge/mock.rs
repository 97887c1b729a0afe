//! Hand-rolled mock [`Bridge`], mirroring the predecessor's
//! `managers/mock.rs` canned-response-plus-call-history style.

use super::{Bridge, BridgeError, ChangeKind, Listener};
use crate::models::{DeviceState, Serial};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    listeners: Vec<(u64, Arc<dyn Listener>)>,
    states: HashMap<Serial, DeviceState>,
    /// Queue of scripted shell responses per `(serial, cmd)`; each call pops
    /// the front, letting a test script "fail twice then succeed".
    shell_script: HashMap<(Serial, String), VecDeque<Result<String, BridgeError>>>,
    reboot_calls: Vec<(Serial, Option<String>)>,
    shell_calls: Vec<(Serial, String)>,
    restart_calls: u32,
}

/// Mock [`Bridge`] driven directly by tests: push connect/disconnect/change
/// events, script shell responses, and inspect call history.
pub struct MockBridge {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_state(&self, serial: &str, state: DeviceState) {
        self.inner
            .lock()
            .unwrap()
            .states
            .insert(serial.to_string(), state);
    }

    /// Appends one scripted response to the back of `(serial, cmd)`'s queue.
    pub fn queue_shell_response(&self, serial: &str, cmd: &str, response: Result<&str, BridgeError>) {
        let response = response.map(|s| s.to_string());
        self.inner
            .lock()
            .unwrap()
            .shell_script
            .entry((serial.to_string(), cmd.to_string()))
            .or_default()
            .push_back(response);
    }

    pub fn reboot_calls(&self) -> Vec<(Serial, Option<String>)> {
        self.inner.lock().unwrap().reboot_calls.clone()
    }

    pub fn shell_call_count(&self, serial: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .shell_calls
            .iter()
            .filter(|(s, _)| s == serial)
            .count()
    }

    pub fn restart_call_count(&self) -> u32 {
        self.inner.lock().unwrap().restart_calls
    }

    /// Simulates the bridge discovering a newly connected device.
    pub async fn fire_connected(&self, serial: &str) {
        self.set_state(serial, DeviceState::Online);
        let listeners = self.inner.lock().unwrap().listeners.clone();
        for (_, l) in listeners {
            l.on_connected(&serial.to_string()).await;
        }
    }

    pub async fn fire_changed(&self, serial: &str, state: DeviceState) {
        self.set_state(serial, state);
        let listeners = self.inner.lock().unwrap().listeners.clone();
        for (_, l) in listeners {
            l.on_changed(&serial.to_string(), ChangeKind::State).await;
        }
    }

    pub async fn fire_disconnected(&self, serial: &str) {
        self.set_state(serial, DeviceState::NotAvailable);
        let listeners = self.inner.lock().unwrap().listeners.clone();
        for (_, l) in listeners {
            l.on_disconnected(&serial.to_string()).await;
        }
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn add_listener(&self, listener: Arc<dyn Listener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().listeners.push((id, listener));
        id
    }

    async fn remove_listener(&self, id: u64) {
        self.inner.lock().unwrap().listeners.retain(|(i, _)| *i != id);
    }

    async fn restart(&self) -> Result<(), BridgeError> {
        self.inner.lock().unwrap().restart_calls += 1;
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.lock().unwrap().listeners.clear();
    }

    async fn shell(&self, serial: &Serial, cmd: &str, _timeout: Duration) -> Result<String, BridgeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.shell_calls.push((serial.clone(), cmd.to_string()));
        let key = (serial.clone(), cmd.to_string());
        match inner.shell_script.get_mut(&key).and_then(|q| q.pop_front()) {
            Some(result) => result,
            None => Ok(String::new()),
        }
    }

    async fn reboot(&self, serial: &Serial, target: Option<&str>) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .reboot_calls
            .push((serial.clone(), target.map(|s| s.to_string())));
        Ok(())
    }

    async fn sync_push(&self, _serial: &Serial, _local: &str, _remote: &str) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn sync_pull(&self, _serial: &Serial, _remote: &str, _local: &str) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn get_state(&self, serial: &Serial) -> DeviceState {
        self.inner
            .lock()
            .unwrap()
            .states
            .get(serial)
            .copied()
            .unwrap_or(DeviceState::NotAvailable)
    }
}
