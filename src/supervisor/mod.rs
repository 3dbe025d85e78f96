//! Drives the global `Status` state machine: startup ordering, the
//! hourly age-sweep timer, metered-network transitions, and graceful
//! shutdown (spec §4.6).

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod metered;

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{cfg::enums::Status, state::State};

/// Age-sweep cadence (spec §4.6: hourly).
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Duration of the optional `--timed-exit` test hook.
const TIMED_EXIT_DURATION: Duration = Duration::from_secs(10);

/// Drives `State::status` through its lifecycle and owns the background
/// timers. `metered_rx` is fed by a network-metering watcher (platform
/// specific, out of scope here); sending `true`/`false` on it triggers
/// the `Running <-> DisabledMetered` transition described in spec §4.6.
pub struct LifecycleSupervisor {
    state: Arc<State>,
    metered_rx: watch::Receiver<bool>,
    timed_exit: bool,
}

impl LifecycleSupervisor {
    pub fn new(state: Arc<State>, metered_rx: watch::Receiver<bool>, timed_exit: bool) -> Self {
        Self {
            state,
            metered_rx,
            timed_exit,
        }
    }

    /// Marks the daemon `Loading` once the bus name is acquired and the
    /// store has been scanned; callers invoke this before [`Self::run`].
    pub async fn mark_loading(&self) {
        self.state.set_status(Status::Loading).await;
    }

    /// Marks the daemon `Running` once the HTTPS listener is bound and
    /// Discovery has registered; callers invoke this before [`Self::run`].
    pub async fn mark_running(&self) {
        self.state.set_status(Status::Running).await;
    }

    /// Runs the supervisor loop until a terminal signal (SIGINT/SIGTERM)
    /// or, if `timed_exit` was requested, until the test timer elapses.
    /// Performs the age sweep on an hourly tick and reacts to metered
    /// network transitions.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let timed_exit_sleep = async {
            if self.timed_exit {
                tokio::time::sleep(TIMED_EXIT_DURATION).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(timed_exit_sleep);

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    let removed = self.state.store.sweep_expired().await;
                    if !removed.is_empty() {
                        info!("age-swept {} expired item(s)", removed.len());
                    }
                    let activated = self.state.store.activate_due_reboots(crate::store::current_boot_time());
                    if !activated.is_empty() {
                        info!("activated {} NEXT_REBOOT item(s) on boot change", activated.len());
                    }
                    if !removed.is_empty() || !activated.is_empty() {
                        self.state.notify_changed().await;
                    }
                },
                changed = self.metered_rx.changed() => {
                    if changed.is_err() {
                        warn!("metered-network watcher closed; ignoring transitions");
                        continue;
                    }
                    let metered = *self.metered_rx.borrow();
                    self.handle_metered_transition(metered).await;
                },
                _ = sigterm() => {
                    info!("received SIGTERM, shutting down");
                    break;
                },
                _ = sigint() => {
                    info!("received SIGINT, shutting down");
                    break;
                },
                _ = &mut timed_exit_sleep => {
                    info!("timed-exit hook elapsed, shutting down");
                    break;
                },
            }
        }

        self.shutdown().await;
    }

    async fn handle_metered_transition(&self, metered: bool) {
        let current = self.state.status().await;
        match (metered, current) {
            (true, Status::Running) => {
                self.state.set_status(Status::DisabledMetered).await;
                if let Err(e) = self.state.discovery.unregister() {
                    warn!("failed to unregister discovery on metered transition: {e}");
                }
            },
            (false, Status::DisabledMetered) => {
                self.state.set_status(Status::Running).await;
                self.state.notify_changed().await;
            },
            _ => {},
        }
    }

    /// Ordered teardown (spec §5): abort in-flight operations (handled
    /// by dropping the listener/connection in the caller), unregister
    /// from Discovery, then let the IPC connection close.
    async fn shutdown(&self) {
        if let Err(e) = self.state.discovery.unregister() {
            warn!("failed to unregister discovery on shutdown: {e}");
        }
    }
}

async fn sigterm() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        },
        Err(_) => std::future::pending::<()>().await,
    }
}

async fn sigint() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
