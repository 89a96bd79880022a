//! Proximity debouncer: the pull-back fires only after the sensor
//! reports the rear display continuously covered for a full window.
//!
//! Time is passed in as `now_ms` so the transition table tests without
//! a clock.

/// Default continuous-cover window before the pull-back fires.
pub const DEFAULT_COVER_WINDOW_MS: u64 = 1_500;

#[derive(Debug, Clone)]
pub struct ProximityDebouncer {
    window_ms: u64,
    covered_since_ms: Option<u64>,
    fired: bool,
}

impl ProximityDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            covered_since_ms: None,
            fired: false,
        }
    }

    /// Feed a sensor edge. Returns `true` exactly once per continuous
    /// cover episode, when the episode reaches the window length.
    pub fn on_event(&mut self, covered: bool, now_ms: u64) -> bool {
        if !covered {
            self.covered_since_ms = None;
            self.fired = false;
            return false;
        }
        let since = *self.covered_since_ms.get_or_insert(now_ms);
        if !self.fired && now_ms.saturating_sub(since) >= self.window_ms {
            self.fired = true;
            return true;
        }
        false
    }

    /// Milliseconds until the pending episode would fire, if one is live.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        let since = self.covered_since_ms?;
        if self.fired {
            return None;
        }
        Some(self.window_ms.saturating_sub(now_ms.saturating_sub(since)))
    }
}

impl Default for ProximityDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_COVER_WINDOW_MS)
    }
}
