//! The timeout accumulator (spec.md §4.C).

/// Result of advancing the accumulator by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutTick {
    /// The window has not yet elapsed; keep waiting.
    AwaitingSlave,
    /// The window elapsed on this tick. The accumulator is reset to zero.
    Timeout,
}

/// Accumulates elapsed microseconds since a request was sent, firing once the configured window
/// is reached.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutAccumulator {
    window_us: u32,
    elapsed_us: u32,
}

impl TimeoutAccumulator {
    pub fn new(window_us: u32) -> Self {
        Self {
            window_us,
            elapsed_us: 0,
        }
    }

    pub fn window_us(&self) -> u32 {
        self.window_us
    }

    pub fn set_window_us(&mut self, window_us: u32) {
        self.window_us = window_us;
    }

    /// Zero the accumulator. Called on every new service initiation and on every successful
    /// reply (spec.md §4.C).
    pub fn reset(&mut self) {
        self.elapsed_us = 0;
    }

    /// Advance the accumulator by `delta_us`, reporting whether the window has elapsed.
    pub fn tick(&mut self, delta_us: u32) -> TimeoutTick {
        self.elapsed_us = self.elapsed_us.saturating_add(delta_us);
        if self.elapsed_us >= self.window_us {
            self.elapsed_us = 0;
            TimeoutTick::Timeout
        } else {
            TimeoutTick::AwaitingSlave
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_or_after_window() {
        let mut acc = TimeoutAccumulator::new(1000);
        assert_eq!(acc.tick(400), TimeoutTick::AwaitingSlave);
        assert_eq!(acc.tick(400), TimeoutTick::AwaitingSlave);
        assert_eq!(acc.tick(200), TimeoutTick::Timeout);
    }

    #[test]
    fn never_fires_before_window() {
        let mut acc = TimeoutAccumulator::new(1000);
        for _ in 0..9 {
            assert_eq!(acc.tick(99), TimeoutTick::AwaitingSlave);
        }
    }

    #[test]
    fn resets_after_firing() {
        let mut acc = TimeoutAccumulator::new(100);
        assert_eq!(acc.tick(100), TimeoutTick::Timeout);
        assert_eq!(acc.tick(50), TimeoutTick::AwaitingSlave);
    }
}
