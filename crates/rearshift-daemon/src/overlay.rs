//! Overlay controller: decides what happens when charging and
//! notification overlays start and end, and broadcasts the signals
//! overlay surfaces listen to.
//!
//! The controller owns the arbitration state machine; the orchestrator
//! performs the IO each decision calls for (pausing the keeper, running
//! the placement pipeline, restoring the session).

use rearshift_core::{AnimationArbiter, AnimationKind, EndDisposition};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Repeated plug/unplug jitter within this window is ignored.
pub const CHARGING_COOLDOWN: Duration = Duration::from_secs(6);

/// Broadcast to overlay surfaces (and anything else that cares).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlaySignal {
    /// The named overlay was preempted and must tear down without
    /// touching the rear display.
    Interrupt(AnimationKind),
    /// A previously interrupted always-on charging overlay should
    /// come back.
    ResumeCharging,
    /// Power disconnected; the charging overlay should finish normally.
    FinishCharging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// Proceed: claim taken, any preempted owner already signaled.
    Start,
    /// Trigger arrived inside the cooldown window; do nothing.
    Ignored,
}

/// What the orchestrator must do after an overlay ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishAction {
    /// Re-project the monitored session onto the rear display.
    Restore,
    /// Relaunch the charging overlay (always-on resume).
    ResumeCharging,
    /// Nothing was underneath; bring the rear home surface back.
    RestoreHome,
    /// The caller no longer owned the overlay slot.
    Stale,
}

pub struct OverlayController {
    arbiter: AnimationArbiter,
    signals: broadcast::Sender<OverlaySignal>,
    last_charging: Option<Instant>,
    charging_always_on_active: bool,
}

impl OverlayController {
    pub fn new(signals: broadcast::Sender<OverlaySignal>) -> Self {
        Self {
            arbiter: AnimationArbiter::new(),
            signals,
            last_charging: None,
            charging_always_on_active: false,
        }
    }

    pub fn active(&self) -> Option<AnimationKind> {
        self.arbiter.active()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlaySignal> {
        self.signals.subscribe()
    }

    /// Power connected. `always_on` keeps the overlay up until power
    /// disconnects instead of auto-dismissing.
    pub fn begin_charging(&mut self, now: Instant, always_on: bool) -> StartDecision {
        if let Some(last) = self.last_charging {
            if now.duration_since(last) < CHARGING_COOLDOWN {
                tracing::debug!("charging trigger inside cooldown, ignored");
                return StartDecision::Ignored;
            }
        }
        self.last_charging = Some(now);
        if let Some(prev) = self.arbiter.start(AnimationKind::Charging) {
            self.signal(OverlaySignal::Interrupt(prev));
        }
        self.charging_always_on_active = always_on;
        StartDecision::Start
    }

    /// Power disconnected: tell the charging overlay to finish. The
    /// actual teardown comes back through `finish(Charging)`.
    pub fn power_disconnected(&mut self) {
        self.signal(OverlaySignal::FinishCharging);
    }

    pub fn begin_notification(&mut self) -> StartDecision {
        if let Some(prev) = self.arbiter.start(AnimationKind::Notification) {
            if prev == AnimationKind::Charging && self.charging_always_on_active {
                // Resume it once the notification ends normally.
                self.arbiter.mark_interrupted_charging_always_on(true);
            }
            self.signal(OverlaySignal::Interrupt(prev));
        }
        StartDecision::Start
    }

    /// Re-claim the slot for a resumed always-on charging overlay.
    /// Bypasses the cooldown: a resume is not a new plug event.
    pub fn resume_charging(&mut self) {
        if let Some(prev) = self.arbiter.start(AnimationKind::Charging) {
            self.signal(OverlaySignal::Interrupt(prev));
        }
        self.charging_always_on_active = true;
    }

    /// Record whether a migrated session held the rear display when the
    /// current overlay went up.
    pub fn set_restore_on_exit(&mut self, restore: bool) {
        self.arbiter.set_restore_on_exit(restore);
    }

    pub fn finish(&mut self, kind: AnimationKind) -> FinishAction {
        match self.arbiter.end(kind) {
            EndDisposition::Stale => FinishAction::Stale,
            EndDisposition::Restore => {
                self.note_ended(kind);
                FinishAction::Restore
            }
            EndDisposition::SkipRestore => {
                self.note_ended(kind);
                if kind == AnimationKind::Notification && self.arbiter.should_resume_charging() {
                    self.arbiter.clear_charging_resume();
                    self.signal(OverlaySignal::ResumeCharging);
                    FinishAction::ResumeCharging
                } else {
                    FinishAction::RestoreHome
                }
            }
        }
    }

    fn note_ended(&mut self, kind: AnimationKind) {
        if kind == AnimationKind::Charging {
            self.charging_always_on_active = false;
        }
    }

    fn signal(&self, signal: OverlaySignal) {
        tracing::debug!(?signal, "overlay signal");
        // Zero receivers just means no surface is listening yet.
        let _ = self.signals.send(signal);
    }
}
