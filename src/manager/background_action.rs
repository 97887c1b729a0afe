//! Cooperative long-running shell producer (SPEC_FULL.md §4.7), e.g. for
//! streaming `logcat -v threadtime` to a caller-supplied sink.

use crate::bridge::{Bridge, BridgeError};
use crate::manager::state_monitor::StateMonitor;
use crate::models::Serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A chunk of output from one shell invocation; ordering is preserved
/// within a single invocation but not guaranteed across restarts.
pub type OutputSink = mpsc::UnboundedSender<String>;

/// Handle to a single running background action. At most one exists per
/// `ManagedDevice` at a time.
pub struct BackgroundAction {
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundAction {
    /// Spawns the worker. `log_start_delay <= Duration::ZERO` means no
    /// startup delay.
    pub fn start(
        serial: Serial,
        cmd: String,
        bridge: Arc<dyn Bridge>,
        monitor: Arc<StateMonitor>,
        sink: OutputSink,
        log_start_delay: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));

        let worker_cancel = cancel.clone();
        let worker_alive = alive.clone();

        let handle = tokio::spawn(async move {
            if log_start_delay > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(log_start_delay) => {}
                    _ = worker_cancel.cancelled() => {
                        worker_alive.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }

            loop {
                if worker_cancel.is_cancelled() {
                    break;
                }

                let shell_result = tokio::select! {
                    r = bridge.shell(&serial, &cmd, Duration::from_secs(3600)) => r,
                    _ = worker_cancel.cancelled() => break,
                };

                match shell_result {
                    Ok(output) => {
                        for line in output.lines() {
                            if sink.send(line.to_string()).is_err() {
                                // Receiver dropped; nothing left to do but stop.
                                worker_alive.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        log::warn!("background action on {serial} hit {err}; awaiting recovery");
                        tokio::select! {
                            _ = Self::wait_for_recovery(&monitor, &err) => {}
                            _ = worker_cancel.cancelled() => break,
                        }
                    }
                }
            }

            worker_alive.store(false, Ordering::SeqCst);
        });

        Self {
            cancel,
            alive,
            handle: Some(handle),
        }
    }

    async fn wait_for_recovery(monitor: &StateMonitor, _error_kind: &BridgeError) {
        monitor.wait_for_online(Duration::from_secs(300)).await;
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Awaits termination, giving up after `timeout`. Always returns
    /// promptly: the worker observes cancellation at every suspension
    /// point.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(_) => true,
                Err(_) => false,
            }
        } else {
            true
        }
    }
}

impl Drop for BackgroundAction {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::models::DeviceState;

    #[tokio::test]
    async fn cancel_then_join_terminates_within_budget() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response("S1", "logcat -v threadtime", Ok("line one\nline two"));
        let monitor = Arc::new(StateMonitor::new("S1".into(), DeviceState::Online));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut action = BackgroundAction::start(
            "S1".to_string(),
            "logcat -v threadtime".to_string(),
            bridge,
            monitor,
            tx,
            Duration::ZERO,
        );

        // Let it pull at least one shell response through.
        let _ = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;

        action.cancel();
        let finished = action.join(Duration::from_secs(5)).await;
        assert!(finished);
        assert!(!action.is_alive());
    }

    #[tokio::test]
    async fn restarts_shell_after_recoverable_error() {
        let bridge = Arc::new(MockBridge::new());
        bridge.queue_shell_response(
            "S1",
            "logcat -v threadtime",
            Err(BridgeError::Io {
                serial: "S1".into(),
                message: "broken pipe".into(),
            }),
        );
        bridge.queue_shell_response("S1", "logcat -v threadtime", Ok("resumed"));
        let monitor = Arc::new(StateMonitor::new("S1".into(), DeviceState::Online));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut action = BackgroundAction::start(
            "S1".to_string(),
            "logcat -v threadtime".to_string(),
            bridge,
            monitor,
            tx,
            Duration::ZERO,
        );

        let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("did not restart in time");
        assert_eq!(line, Some("resumed".to_string()));

        action.cancel();
        action.join(Duration::from_secs(5)).await;
    }
}
