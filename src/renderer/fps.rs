//! Frame rate measurement

use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Counts frames over one second windows. The reported rate is the count of the last
/// complete window.
#[derive(Debug, Clone, Default)]
pub struct FpsMonitor {
    window_start: Option<Instant>,
    frames: u32,
    fps: u32,
}

impl FpsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.window_start.is_some()
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, now: Instant) {
        self.window_start = Some(now);
        self.frames = 0;
    }

    /// Count one frame
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    pub fn update_at(&mut self, now: Instant) {
        let Some(start) = self.window_start else {
            self.start_at(now);
            return;
        };
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= WINDOW {
            self.fps = self.frames;
            self.frames = 0;
            // Advance by whole windows
            let windows = (elapsed.as_nanos() / WINDOW.as_nanos()) as u32;
            self.window_start = Some(start + WINDOW * windows);
        }
    }

    /// Frames counted during the last complete window
    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
