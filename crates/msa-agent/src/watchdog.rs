//! Background tasks that drive a started or stopped instance to its next
//! settled state.
//!
//! A watchdog only remembers `(id, generation)`. On every tick it re-locks
//! the slot and checks that the attached handle is still the one it was
//! spawned for; anything else means another path already settled the
//! instance.

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use msa_process::InstanceId;
use tokio::task::AbortHandle;

use crate::classifier::{BootSignal, LogClassifier};
use crate::config::WatchdogTiming;
use crate::error::SupervisorError;
use crate::registry::Registry;

#[derive(Debug)]
pub enum WatchdogEvent {
    /// Ready marker seen; the instance is now running.
    Ready { id: InstanceId, elapsed: Duration },
    /// The start was abandoned and the process killed.
    StartFailed {
        id: InstanceId,
        error: SupervisorError,
    },
    /// The process exited after a stop request.
    Stopped { id: InstanceId, elapsed: Duration },
    /// The process ignored the stop request past the configured ceiling and
    /// was killed.
    StopForced { id: InstanceId, elapsed: Duration },
}

impl WatchdogEvent {
    pub fn id(&self) -> &InstanceId {
        match self {
            WatchdogEvent::Ready { id, .. }
            | WatchdogEvent::StartFailed { id, .. }
            | WatchdogEvent::Stopped { id, .. }
            | WatchdogEvent::StopForced { id, .. } => id,
        }
    }
}

/// Sink for watchdog outcomes, which have no caller to return to.
pub trait WatchdogObserver: Send + Sync + 'static {
    fn notify(&self, event: WatchdogEvent);
}

/// Logs every outcome through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WatchdogObserver for TracingObserver {
    fn notify(&self, event: WatchdogEvent) {
        match event {
            WatchdogEvent::Ready { id, elapsed } => {
                tracing::info!(instance_id = %id, elapsed_ms = elapsed.as_millis() as u64, "server is running");
            }
            WatchdogEvent::StartFailed { id, error } => {
                tracing::warn!(instance_id = %id, code = error.code(), %error, "server failed to start");
            }
            WatchdogEvent::Stopped { id, elapsed } => {
                tracing::info!(instance_id = %id, elapsed_ms = elapsed.as_millis() as u64, "server stopped");
            }
            WatchdogEvent::StopForced { id, elapsed } => {
                tracing::warn!(instance_id = %id, elapsed_ms = elapsed.as_millis() as u64, "server killed after ignoring stop");
            }
        }
    }
}

fn exited_during_startup() -> SupervisorError {
    SupervisorError::io(
        "startup",
        io::Error::new(io::ErrorKind::BrokenPipe, "server is not started"),
    )
}

fn port_bind_failed() -> SupervisorError {
    SupervisorError::io(
        "startup",
        io::Error::new(io::ErrorKind::AddrInUse, "fail to bind port"),
    )
}

#[derive(Clone)]
pub(crate) struct Watchdog {
    registry: Registry,
    observer: Arc<dyn WatchdogObserver>,
    timing: WatchdogTiming,
}

impl Watchdog {
    pub(crate) fn new(
        registry: Registry,
        observer: Arc<dyn WatchdogObserver>,
        timing: WatchdogTiming,
    ) -> Self {
        Self {
            registry,
            observer,
            timing,
        }
    }

    pub(crate) fn spawn_startup(&self, id: InstanceId, generation: u64) -> AbortHandle {
        let this = self.clone();
        tokio::spawn(async move { this.run_startup(id, generation).await }).abort_handle()
    }

    pub(crate) fn spawn_shutdown(&self, id: InstanceId, generation: u64) -> AbortHandle {
        let this = self.clone();
        tokio::spawn(async move { this.run_shutdown(id, generation).await }).abort_handle()
    }

    async fn run_startup(self, id: InstanceId, generation: u64) {
        let started = Instant::now();
        let interval = self.timing.poll_interval;
        let mut remaining = self.timing.startup_budget;

        loop {
            tokio::time::sleep(interval).await;

            let dir = {
                let Ok(mut slot) = self.registry.lock(id.as_str()).await else {
                    tracing::debug!(instance_id = %id, "startup watchdog: instance removed");
                    return;
                };
                let Some(handle) = slot.current(generation) else {
                    tracing::debug!(instance_id = %id, generation, "startup watchdog: handle replaced");
                    return;
                };
                let stopping = handle.stopping;

                if !handle.is_alive() {
                    if stopping {
                        // Exit after a stop request; the shutdown watchdog reaps it.
                        return;
                    }
                    if let Some(h) = slot.handle.take() {
                        h.terminate().await;
                    }
                    self.observer.notify(WatchdogEvent::StartFailed {
                        id,
                        error: exited_during_startup(),
                    });
                    return;
                }

                // The budget also bounds a boot that ignores a stop request.
                remaining = remaining.saturating_sub(interval);
                if remaining.is_zero() {
                    if let Some(h) = slot.handle.take() {
                        h.terminate().await;
                    }
                    self.observer.notify(WatchdogEvent::StartFailed {
                        id,
                        error: SupervisorError::Timeout(self.timing.startup_budget),
                    });
                    return;
                }

                if stopping {
                    continue;
                }
                slot.dir.clone()
            };

            // The log is read without holding the instance lock.
            let signal = match LogClassifier::for_dir(&dir).boot_signal().await {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(instance_id = %id, %err, "startup watchdog: console log unreadable");
                    continue;
                }
            };
            if signal == BootSignal::Pending {
                continue;
            }

            let Ok(mut slot) = self.registry.lock(id.as_str()).await else {
                return;
            };
            let Some(handle) = slot.current(generation) else {
                return;
            };
            if handle.stopping {
                continue;
            }
            if signal == BootSignal::Ready {
                handle.starting = false;
                self.observer.notify(WatchdogEvent::Ready {
                    id,
                    elapsed: started.elapsed(),
                });
            } else {
                if let Some(h) = slot.handle.take() {
                    h.terminate().await;
                }
                self.observer.notify(WatchdogEvent::StartFailed {
                    id,
                    error: port_bind_failed(),
                });
            }
            return;
        }
    }

    async fn run_shutdown(self, id: InstanceId, generation: u64) {
        let started = Instant::now();
        let interval = self.timing.poll_interval;

        loop {
            tokio::time::sleep(interval).await;

            let Ok(mut slot) = self.registry.lock(id.as_str()).await else {
                self.observer.notify(WatchdogEvent::Stopped {
                    id,
                    elapsed: started.elapsed(),
                });
                return;
            };
            let Some(handle) = slot.current(generation) else {
                // Another path already reaped it.
                self.observer.notify(WatchdogEvent::Stopped {
                    id,
                    elapsed: started.elapsed(),
                });
                return;
            };

            if !handle.is_alive() {
                if let Some(h) = slot.handle.take() {
                    h.terminate().await;
                }
                self.observer.notify(WatchdogEvent::Stopped {
                    id,
                    elapsed: started.elapsed(),
                });
                return;
            }

            if let Some(limit) = self.timing.stop_timeout
                && started.elapsed() >= limit
            {
                if let Some(h) = slot.handle.take() {
                    h.terminate().await;
                }
                self.observer.notify(WatchdogEvent::StopForced {
                    id,
                    elapsed: started.elapsed(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_errors_carry_user_facing_messages() {
        let e = exited_during_startup();
        assert_eq!(e.code(), "io_failure");
        assert!(e.to_string().contains("server is not started"));

        let e = port_bind_failed();
        assert!(e.to_string().contains("fail to bind port"));
    }

    #[test]
    fn event_exposes_instance_id() {
        let ev = WatchdogEvent::Ready {
            id: InstanceId("abc".to_string()),
            elapsed: Duration::from_millis(10),
        };
        assert_eq!(ev.id().as_str(), "abc");
    }
}
