//! Periodic trigger for the sync engine.
//!
//! State machine: `Disabled` -> (enable) -> `EnabledIdle` <-> `EnabledRunning`,
//! terminal `Stopped` on shutdown. A tick that fires while a pass is running
//! is dropped, never queued; enabling fires a tick immediately, then on the
//! cadence. Shutdown lets the in-flight pass finish and starts nothing new.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tillsync_core::ServerStatus;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::status::StatusPublisher;
use crate::traits::SyncRunner;

/// Scheduler lifecycle state, readable by the UI and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Auto-sync off (initial state).
    Disabled,
    /// Auto-sync on, waiting for the next tick.
    EnabledIdle,
    /// A pass is in flight.
    EnabledRunning,
    /// Shutdown observed; no further passes will start.
    Stopped,
}

/// Drives [`SyncRunner::run_cycle`] on a fixed cadence.
pub struct Scheduler {
    runner: Arc<dyn SyncRunner>,
    interval: Duration,
    status: StatusPublisher,
    state: ArcSwap<SchedulerState>,
    enabled: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(runner: Arc<dyn SyncRunner>, interval: Duration, status: StatusPublisher) -> Self {
        let (enabled, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self {
            runner,
            interval,
            status,
            state: ArcSwap::from_pointee(SchedulerState::Disabled),
            enabled,
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        **self.state.load()
    }

    /// Toggle auto-sync. Enabling fires a tick immediately (from the run
    /// loop); disabling takes effect before the next tick.
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.enabled.send(enabled);
        self.status.update(|status| status.auto_sync_enabled = enabled);
        if enabled {
            if self.state() == SchedulerState::Disabled {
                self.state.store(Arc::new(SchedulerState::EnabledIdle));
            }
        } else if self.state() != SchedulerState::Stopped {
            self.state.store(Arc::new(SchedulerState::Disabled));
        }
        info!(enabled, "auto-sync toggled");
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Signal shutdown. The in-flight pass (if any) completes; the run loop
    /// then parks in `Stopped`.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A receiver the engine can watch to stop between pages.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run one cycle now unless one is already in flight (in which case the
    /// request is dropped, matching the tick rule).
    pub async fn tick_now(&self) {
        if *self.shutdown.borrow() {
            debug!("tick dropped: shutdown in progress");
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("tick dropped: a pass is already running");
            return;
        }

        if self.state() != SchedulerState::Stopped {
            self.state.store(Arc::new(SchedulerState::EnabledRunning));
        }
        let _results = self.runner.run_cycle().await;
        self.running.store(false, Ordering::SeqCst);

        let next = if *self.shutdown.borrow() {
            SchedulerState::Stopped
        } else if self.is_enabled() {
            SchedulerState::EnabledIdle
        } else {
            SchedulerState::Disabled
        };
        self.state.store(Arc::new(next));
    }

    /// Main loop: startup probe once, then tick on enable and on the
    /// cadence until shutdown.
    pub async fn run(self: Arc<Self>) {
        self.runner.probe().await;

        let mut enabled_rx = self.enabled.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if !*enabled_rx.borrow() {
                // Parked until the toggle or shutdown changes.
                tokio::select! {
                    changed = enabled_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            // Enabled: fire now, then wait out the cadence.
            self.tick_now().await;
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                changed = enabled_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        self.state.store(Arc::new(SchedulerState::Stopped));
        self.status
            .update(|status| status.server_status = ServerStatus::Stopped);
        info!("scheduler stopped");
    }
}
