//! Frame timing for the game loop.

use std::time::{Duration, Instant};

/// Longest delta handed to the game layer. Stalls such as a window drag or a
/// debugger break would otherwise produce one huge simulation step.
const MAX_DELTA: Duration = Duration::from_millis(250);

/// Measures per-frame delta time and counts frames.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    max_delta: Duration,
}

impl FrameTimer {
    /// Create a timer starting now.
    pub fn new() -> Self {
        Self::with_max_delta(MAX_DELTA)
    }

    /// Create a timer with a custom delta clamp.
    pub fn with_max_delta(max_delta: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            max_delta,
        }
    }

    /// Advance one frame and return the time since the previous tick,
    /// clamped to the configured maximum.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.frames += 1;
        delta.min(self.max_delta)
    }

    /// [`tick`](Self::tick) in seconds.
    pub fn tick_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Number of ticks since creation or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Time since creation or the last reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Mean frames per second since creation or the last reset.
    pub fn average_fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    /// Restart timing and the frame count from now.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.frames = 0;
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counts_frames() {
        let mut timer = FrameTimer::new();
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn tick_is_clamped() {
        let mut timer = FrameTimer::with_max_delta(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.tick(), Duration::from_millis(1));
    }

    #[test]
    fn reset_clears_frame_count() {
        let mut timer = FrameTimer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
    }
}
