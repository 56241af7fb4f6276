//! Sliding-window heart rate variability
//!
//! Keeps the most recent RR intervals and computes sdNN (the sample standard
//! deviation of the window) on demand.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of RR intervals in the window
pub const DEFAULT_RR_WINDOW: usize = 5;
/// Largest configurable window
pub const MAX_RR_WINDOW: usize = 999;

/// Bounded window of recent RR intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvWindow {
    /// RR intervals (ms), oldest first
    window: VecDeque<u16>,
    /// Maximum window size
    capacity: usize,
}

impl Default for HrvWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RR_WINDOW)
    }
}

impl HrvWindow {
    /// Create a window holding `capacity` intervals, clamped to 1..=999
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_RR_WINDOW);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an interval, evicting the oldest beyond capacity
    pub fn push(&mut self, rr_ms: u16) {
        self.window.push_back(rr_ms);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    /// Sample standard deviation (N−1) of the window, `None` below two entries
    pub fn sdnn(&self) -> Option<f64> {
        let n = self.window.len();
        if n < 2 {
            return None;
        }

        let mean = self.mean()?;
        let sum_sq: f64 = self
            .window
            .iter()
            .map(|&rr| {
                let d = f64::from(rr) - mean;
                d * d
            })
            .sum();

        Some((sum_sq / (n - 1) as f64).sqrt())
    }

    /// Mean RR interval of the window
    pub fn mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let sum: f64 = self.window.iter().map(|&rr| f64::from(rr)).sum();
        Some(sum / self.window.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current window contents, oldest first
    pub fn values(&self) -> impl Iterator<Item = u16> + '_ {
        self.window.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, values: &[u16]) -> HrvWindow {
        let mut window = HrvWindow::new(capacity);
        for &v in values {
            window.push(v);
        }
        window
    }

    #[test]
    fn test_sdnn_undefined_below_two_samples() {
        let mut window = HrvWindow::default();
        assert_eq!(window.sdnn(), None);
        window.push(800);
        assert_eq!(window.sdnn(), None);
        window.push(800);
        assert_eq!(window.sdnn(), Some(0.0));
    }

    #[test]
    fn test_sdnn_sample_standard_deviation() {
        let window = filled(5, &[500, 520, 480, 510, 505]);

        // mean 503, squared deviations sum to 880, 880 / 4 = 220
        let expected = 220.0f64.sqrt();
        assert!((window.sdnn().unwrap() - expected).abs() < 1e-9);
        assert!((window.sdnn().unwrap() - 14.832).abs() < 0.001);
    }

    #[test]
    fn test_window_eviction() {
        let mut window = filled(5, &[500, 520, 480, 510, 505]);
        window.push(530);

        assert_eq!(window.len(), 5);
        assert_eq!(window.values().collect::<Vec<_>>(), vec![520, 480, 510, 505, 530]);

        let recomputed = filled(5, &[520, 480, 510, 505, 530]);
        assert_eq!(window.sdnn(), recomputed.sdnn());
    }

    #[test]
    fn test_capacity_clamped() {
        assert_eq!(HrvWindow::new(0).capacity(), 1);
        assert_eq!(HrvWindow::new(5000).capacity(), MAX_RR_WINDOW);

        // A one-slot window never has an sdNN
        let window = filled(1, &[500, 900, 700]);
        assert_eq!(window.values().collect::<Vec<_>>(), vec![700]);
        assert_eq!(window.sdnn(), None);
    }

    #[test]
    fn test_mean() {
        let window = filled(3, &[600, 700, 800, 900]);
        assert!((window.mean().unwrap() - 800.0).abs() < 1e-9);
    }
}
