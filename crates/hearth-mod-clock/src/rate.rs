use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Events-per-second over a sliding window of recent timestamps.
pub struct RateMeter {
    samples: VecDeque<Instant>,
    window: Duration,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.samples.push_back(now);
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.samples.front().is_some_and(|&t| t < cutoff) {
            self.samples.pop_front();
        }
    }

    /// `0.0` until at least two events fall inside the window.
    pub fn per_second(&self) -> f64 {
        let Some(&latest) = self.samples.back() else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let in_window = match latest.checked_sub(self.window) {
            Some(start) => self.samples.iter().filter(|&&t| t >= start).count(),
            None => self.samples.len(),
        };
        in_window as f64 / self.window.as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
