//! Overlay arbitration: at most one overlay surface owns the rear
//! display at a time. `start` preempts, never queues.
//!
//! The arbiter is pure and lock-free; the daemon wraps the single
//! instance in a mutex and emits interrupt signals based on the
//! return values here.

use crate::types::AnimationKind;

/// What the owner ending an overlay should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndDisposition {
    /// The rear display held a migrated session before the overlay;
    /// re-project it.
    Restore,
    /// Nothing to put back (or the claim was forfeited by preemption).
    SkipRestore,
    /// The caller no longer owns the overlay slot; do nothing.
    Stale,
}

#[derive(Debug, Default)]
pub struct AnimationArbiter {
    current: Option<AnimationKind>,
    restore_on_exit: bool,
    interrupted_charging_always_on: bool,
}

impl AnimationArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The overlay kind currently holding the rear display, if any.
    pub fn active(&self) -> Option<AnimationKind> {
        self.current
    }

    /// Claim the overlay slot for `kind`. Returns the preempted previous
    /// owner, or `None` if the slot was idle or already held by `kind`.
    ///
    /// Preemption forfeits the previous owner's restore claim: after an
    /// interrupt the preempted overlay must tear down without touching
    /// the rear display, so only one party performs restoration.
    pub fn start(&mut self, kind: AnimationKind) -> Option<AnimationKind> {
        let prev = self.current;
        if prev == Some(kind) {
            return None;
        }
        if prev.is_some() {
            self.restore_on_exit = false;
        }
        self.current = Some(kind);
        prev
    }

    /// Release the overlay slot. Stale if `kind` does not hold it.
    pub fn end(&mut self, kind: AnimationKind) -> EndDisposition {
        if self.current != Some(kind) {
            return EndDisposition::Stale;
        }
        self.current = None;
        if std::mem::take(&mut self.restore_on_exit) {
            EndDisposition::Restore
        } else {
            EndDisposition::SkipRestore
        }
    }

    /// Record that a migrated session sat on the rear display when the
    /// current overlay started, so a normal end puts it back.
    pub fn set_restore_on_exit(&mut self, restore: bool) {
        self.restore_on_exit = restore;
    }

    pub fn restore_on_exit(&self) -> bool {
        self.restore_on_exit
    }

    /// A charging overlay running in always-on mode was preempted by a
    /// notification; resume it when the notification ends normally.
    pub fn mark_interrupted_charging_always_on(&mut self, flag: bool) {
        self.interrupted_charging_always_on = flag;
    }

    pub fn should_resume_charging(&self) -> bool {
        self.interrupted_charging_always_on
    }

    pub fn clear_charging_resume(&mut self) {
        self.interrupted_charging_always_on = false;
    }
}
