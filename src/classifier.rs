//! Two-state HRV classifier with dwell-time hysteresis
//!
//! The classifier moves between [`HrvState::Low`] and [`HrvState::High`] when sdNN
//! crosses the decision boundary, but only after the current state has been held
//! for its configured minimum dwell time.

use crate::types::HrvState;
use serde::{Deserialize, Serialize};

/// Default minimum seconds in either state
pub const DEFAULT_DWELL_SECS: f64 = 40.0;
/// Default sdNN decision boundary (ms)
pub const DEFAULT_DECISION_BOUNDARY: f64 = 100.0;

/// A state change reported by [`StateClassifier::update`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    pub from: HrvState,
    pub to: HrvState,
    /// Session time of the transition (seconds)
    pub at: f64,
}

/// Hysteresis state machine driven by sdNN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateClassifier {
    state: HrvState,
    /// Session time the current state was entered
    entered_at: f64,
    /// Minimum seconds per state, indexed by state
    dwell_secs: [f64; 2],
    decision_boundary: f64,
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new(
            [DEFAULT_DWELL_SECS, DEFAULT_DWELL_SECS],
            DEFAULT_DECISION_BOUNDARY,
        )
    }
}

impl StateClassifier {
    /// Start in state 0 at session time 0
    pub fn new(dwell_secs: [f64; 2], decision_boundary: f64) -> Self {
        Self {
            state: HrvState::Low,
            entered_at: 0.0,
            dwell_secs,
            decision_boundary,
        }
    }

    pub fn state(&self) -> HrvState {
        self.state
    }

    pub fn decision_boundary(&self) -> f64 {
        self.decision_boundary
    }

    /// Seconds spent in the current state as of session time `t`
    pub fn time_in_state(&self, t: f64) -> f64 {
        (t - self.entered_at).max(0.0)
    }

    /// Feed one RR sample's sdNN at session time `t` (seconds).
    ///
    /// Returns the transition when one happened. An undefined sdNN always holds the
    /// current state.
    pub fn update(&mut self, t: f64, sdnn: Option<f64>) -> Option<Transition> {
        let sdnn = sdnn.filter(|v| !v.is_nan())?;

        if self.time_in_state(t) < self.dwell_secs[self.state.index()] {
            return None;
        }

        let candidate = if sdnn > self.decision_boundary {
            HrvState::High
        } else {
            HrvState::Low
        };

        if candidate == self.state {
            return None;
        }

        let transition = Transition {
            from: self.state,
            to: candidate,
            at: t,
        };
        self.state = candidate;
        self.entered_at = t;
        Some(transition)
    }
}
