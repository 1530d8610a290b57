//! Frame-rate cap and frame-time history.
//!
//! The history is reporting only: it feeds [`FrameStats`](crate::FrameStats)
//! and never changes how long the pacer sleeps.

use std::time::{Duration, Instant};

/// Number of frame durations kept for the rolling average.
pub const FRAME_TIME_HISTORY: usize = 16;

/// Frame-rate cap after clamping to the display refresh rate.
///
/// `target` of zero means unlimited. An unknown or zero refresh rate leaves
/// the target unchanged.
pub fn effective_fps_cap(target: u32, refresh_rate: Option<u32>) -> Option<u32> {
    if target == 0 {
        return None;
    }
    match refresh_rate {
        Some(refresh) if refresh > 0 => Some(target.min(refresh)),
        _ => Some(target),
    }
}

/// Ring buffer of recent frame durations.
#[derive(Debug, Clone)]
pub struct FrameTimeHistory {
    samples: [Duration; FRAME_TIME_HISTORY],
    next: usize,
    filled: usize,
}

impl Default for FrameTimeHistory {
    fn default() -> Self {
        Self {
            samples: [Duration::ZERO; FRAME_TIME_HISTORY],
            next: 0,
            filled: 0,
        }
    }
}

impl FrameTimeHistory {
    pub fn record(&mut self, duration: Duration) {
        self.samples[self.next] = duration;
        self.next = (self.next + 1) % FRAME_TIME_HISTORY;
        self.filled = (self.filled + 1).min(FRAME_TIME_HISTORY);
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<Duration> {
        (self.filled > 0)
            .then(|| self.samples[(self.next + FRAME_TIME_HISTORY - 1) % FRAME_TIME_HISTORY])
    }

    /// Mean of the recorded samples.
    pub fn average(&self) -> Option<Duration> {
        if self.filled == 0 {
            return None;
        }
        let total: Duration = self.samples[..self.filled].iter().sum();
        Some(total / self.filled as u32)
    }
}

/// Blocks the frame loop until the next frame deadline.
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_budget: Option<Duration>,
    history: FrameTimeHistory,
}

impl FramePacer {
    /// `target_fps` of zero means unthrottled.
    pub fn new(target_fps: u32, refresh_rate: Option<u32>) -> Self {
        let cap = effective_fps_cap(target_fps, refresh_rate);
        if let Some(cap) = cap.filter(|&cap| cap != target_fps) {
            tracing::info!("FPS cap {target_fps} clamped to display refresh rate {cap}");
        }
        Self {
            frame_budget: cap.map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps))),
            history: FrameTimeHistory::default(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, None)
    }

    /// Time allotted to one frame, `None` when unthrottled.
    pub fn frame_budget(&self) -> Option<Duration> {
        self.frame_budget
    }

    /// Frames per second the pacer holds to, `None` when unthrottled.
    pub fn fps_cap(&self) -> Option<u32> {
        self.frame_budget
            .map(|budget| (1_000_000_000 / budget.as_nanos().max(1)) as u32)
    }

    pub fn history(&self) -> &FrameTimeHistory {
        &self.history
    }

    /// Record how long the frame that began at `frame_start` took to render.
    pub fn record(&mut self, frame_start: Instant, now: Instant) {
        self.history.record(now.saturating_duration_since(frame_start));
    }

    /// When the next frame may start, `None` when unthrottled.
    pub fn deadline(&self, frame_start: Instant) -> Option<Instant> {
        self.frame_budget.map(|budget| frame_start + budget)
    }

    /// Sleep until the deadline of the frame that began at `frame_start`.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait(&self, frame_start: Instant) {
        if let Some(deadline) = self.deadline(frame_start) {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_below_refresh_is_kept() {
        assert_eq!(effective_fps_cap(30, Some(60)), Some(30));
    }

    #[test]
    fn cap_above_refresh_is_clamped() {
        assert_eq!(effective_fps_cap(120, Some(60)), Some(60));
    }

    #[test]
    fn zero_cap_is_unlimited() {
        assert_eq!(effective_fps_cap(0, Some(60)), None);
        assert!(FramePacer::new(0, Some(60)).frame_budget().is_none());
    }

    #[test]
    fn unknown_refresh_keeps_target() {
        assert_eq!(effective_fps_cap(144, None), Some(144));
        assert_eq!(effective_fps_cap(144, Some(0)), Some(144));
    }

    #[test]
    fn pacer_budget_follows_clamped_cap() {
        let pacer = FramePacer::new(120, Some(60));
        assert_eq!(pacer.fps_cap(), Some(60));
        let start = Instant::now();
        assert_eq!(
            pacer.deadline(start),
            Some(start + Duration::from_nanos(1_000_000_000 / 60))
        );
    }

    #[test]
    fn history_wraps_after_capacity() {
        let mut history = FrameTimeHistory::default();
        assert!(history.average().is_none());

        for _ in 0..FRAME_TIME_HISTORY {
            history.record(Duration::from_millis(10));
        }
        for _ in 0..FRAME_TIME_HISTORY / 2 {
            history.record(Duration::from_millis(20));
        }

        assert_eq!(history.len(), FRAME_TIME_HISTORY);
        assert_eq!(history.last(), Some(Duration::from_millis(20)));
        assert_eq!(history.average(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn recording_does_not_change_budget() {
        let mut pacer = FramePacer::new(30, None);
        let budget = pacer.frame_budget();
        let start = Instant::now();
        pacer.record(start, start + Duration::from_millis(50));
        assert_eq!(pacer.frame_budget(), budget);
        assert_eq!(pacer.history().last(), Some(Duration::from_millis(50)));
    }
}
