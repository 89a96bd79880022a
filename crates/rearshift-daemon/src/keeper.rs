//! Rear display keeper: while a migrated session sits on the rear
//! display, keep the panel awake and watch for the session leaving.
//!
//! Pausing (for an overlay) drops the pending foreground check rather
//! than ignoring its result; a check scheduled before the pause must
//! never fire during the overlay. Resuming re-arms no sooner than the
//! grace delay, giving the restored session time to settle.

use rearshift_bridge::BridgeHandle;
use rearshift_core::{ProximityDebouncer, Settings, TaskRef, PRIMARY_DISPLAY, REAR_DISPLAY};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const WAKE_PULSE_INTERVAL: Duration = Duration::from_millis(100);
pub const FOREGROUND_CHECK_INTERVAL: Duration = Duration::from_secs(2);
pub const RESUME_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperCommand {
    /// An overlay is taking the rear display; stand down.
    Pause,
    /// The overlay is gone and the session is back; re-arm after grace.
    Resume,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeeperEvent {
    /// Something other than the monitored session fronted the rear
    /// display. The keeper has already restored the rear home surface.
    Departed { occupant: Option<TaskRef> },
    /// The proximity pull-back fired; the session is back on the
    /// primary display.
    PulledBack,
    Stopped,
}

/// Control half handed to the orchestrator when a keeper is spawned.
#[derive(Clone)]
pub struct KeeperHandle {
    commands: mpsc::Sender<KeeperCommand>,
    proximity: mpsc::Sender<bool>,
    cancel: CancellationToken,
}

impl KeeperHandle {
    pub async fn send(&self, cmd: KeeperCommand) {
        if self.commands.send(cmd).await.is_err() {
            tracing::debug!(?cmd, "keeper already gone");
        }
    }

    pub async fn proximity_event(&self, covered: bool) {
        let _ = self.proximity.send(covered).await;
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

pub struct KeeperLoop {
    handle: BridgeHandle,
    settings: Arc<Settings>,
    task: TaskRef,
    events: mpsc::Sender<KeeperEvent>,
    commands: mpsc::Receiver<KeeperCommand>,
    proximity: mpsc::Receiver<bool>,
    cancel: CancellationToken,
}

enum Check {
    /// Monitored session (or one of our overlays) still fronts the display.
    Keep,
    /// Could not resolve anything; try again next round.
    Skip,
    Departed(Option<TaskRef>),
}

impl KeeperLoop {
    /// Spawn a keeper for `task` and return its control handle.
    pub fn spawn(
        handle: BridgeHandle,
        settings: Arc<Settings>,
        task: TaskRef,
        events: mpsc::Sender<KeeperEvent>,
    ) -> KeeperHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (prox_tx, prox_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let keeper = KeeperLoop {
            handle,
            settings,
            task,
            events,
            commands: cmd_rx,
            proximity: prox_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(keeper.run());
        KeeperHandle {
            commands: cmd_tx,
            proximity: prox_tx,
            cancel,
        }
    }

    async fn run(mut self) {
        tracing::info!(task = %self.task, "keeper started");
        let started = Instant::now();
        let now_ms = |at: Instant| at.duration_since(started).as_millis() as u64;

        let mut paused = false;
        let mut next_check = Instant::now() + FOREGROUND_CHECK_INTERVAL;
        let mut next_pulse = Instant::now();
        let mut debounce = ProximityDebouncer::default();
        let mut covered_now = false;
        let mut prox_deadline: Option<Instant> = None;
        let far = Instant::now() + Duration::from_secs(86_400);

        let event = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_pulse), if !paused && self.settings.keep_rear_awake => {
                    next_pulse += WAKE_PULSE_INTERVAL;
                    self.wake_pulse().await;
                }

                _ = tokio::time::sleep_until(next_check), if !paused => {
                    next_check = Instant::now() + FOREGROUND_CHECK_INTERVAL;
                    match self.check_foreground().await {
                        Check::Keep | Check::Skip => {}
                        Check::Departed(occupant) => {
                            self.restore_home().await;
                            break KeeperEvent::Departed { occupant };
                        }
                    }
                }

                _ = tokio::time::sleep_until(prox_deadline.unwrap_or(far)), if prox_deadline.is_some() => {
                    prox_deadline = None;
                    // No uncover event arrived; the display is still
                    // covered, so the episode completes now.
                    if covered_now && debounce.on_event(true, now_ms(Instant::now())) {
                        self.pull_back().await;
                        break KeeperEvent::PulledBack;
                    }
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(KeeperCommand::Pause) => {
                            tracing::debug!("keeper paused");
                            paused = true;
                        }
                        Some(KeeperCommand::Resume) => {
                            tracing::debug!("keeper resuming after grace");
                            paused = false;
                            next_check = Instant::now() + RESUME_GRACE;
                            next_pulse = Instant::now();
                        }
                        Some(KeeperCommand::Stop) | None => break KeeperEvent::Stopped,
                    }
                }

                covered = self.proximity.recv() => {
                    let Some(covered) = covered else { break KeeperEvent::Stopped };
                    if !self.settings.proximity_pullback {
                        continue;
                    }
                    covered_now = covered;
                    let at = now_ms(Instant::now());
                    if debounce.on_event(covered, at) {
                        self.pull_back().await;
                        break KeeperEvent::PulledBack;
                    }
                    prox_deadline = debounce
                        .remaining_ms(at)
                        .map(|r| Instant::now() + Duration::from_millis(r));
                }

                _ = self.cancel.cancelled() => break KeeperEvent::Stopped,
            }
        };

        tracing::info!(task = %self.task, ?event, "keeper stopped");
        let _ = self.events.send(event).await;
    }

    async fn wake_pulse(&self) {
        let Some(bridge) = self.handle.current().await else {
            return;
        };
        if let Err(e) = bridge.wake_display(REAR_DISPLAY).await {
            tracing::debug!(error = %e, "wake pulse failed");
            self.handle.mark_dead().await;
        }
    }

    async fn check_foreground(&self) -> Check {
        let Some(bridge) = self.handle.current().await else {
            return Check::Skip;
        };
        match bridge.query_foreground_session(REAR_DISPLAY).await {
            Ok(Some(entry)) => {
                if entry.task.task_id == self.task.task_id {
                    Check::Keep
                } else if self.settings.is_overlay_component(&entry.component) {
                    // One of our overlays temporarily owns the display.
                    Check::Keep
                } else if entry.task.package == self.settings.rear_home_package {
                    Check::Departed(None)
                } else {
                    Check::Departed(Some(entry.task))
                }
            }
            Ok(None) => Check::Skip,
            Err(e) => {
                tracing::warn!(error = %e, "keeper foreground check failed");
                self.handle.mark_dead().await;
                Check::Skip
            }
        }
    }

    async fn restore_home(&self) {
        let Some(bridge) = self.handle.current().await else {
            return;
        };
        if let Err(e) = bridge.restore_rear_home().await {
            tracing::warn!(error = %e, "rear home restore failed");
        }
    }

    async fn pull_back(&self) {
        tracing::info!(task = %self.task, "proximity pull-back");
        let Some(bridge) = self.handle.current().await else {
            return;
        };
        if let Err(e) = bridge
            .move_session_to_display(self.task.task_id, PRIMARY_DISPLAY)
            .await
        {
            tracing::warn!(error = %e, "pull-back move failed");
        }
        if let Err(e) = bridge.restore_rear_home().await {
            tracing::warn!(error = %e, "rear home restore failed");
        }
    }
}
