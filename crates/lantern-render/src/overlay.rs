//! Frame statistics and the debug overlay strategy.
//!
//! The overlay only reads [`FrameStats`]. It can ask for a different mesh
//! through a [`MeshRequest`], which the scheduler applies between frames.

use crate::mesh::MeshKind;
use lantern_gpu::MemoryStats;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of the frame loop published after every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames presented so far.
    pub frame_count: u64,
    pub last_frame_time: Option<Duration>,
    pub average_frame_time: Option<Duration>,
    pub swapchain_rebuilds: u64,
    /// Frames dropped because of an aborted recording or a stale swapchain.
    pub skipped_frames: u64,
    pub mesh: MeshKind,
    pub vertex_count: u32,
    pub index_count: u32,
    pub memory: MemoryStats,
}

impl FrameStats {
    pub fn average_fps(&self) -> Option<f64> {
        self.average_frame_time
            .filter(|t| !t.is_zero())
            .map(|t| 1.0 / t.as_secs_f64())
    }
}

/// Pending mesh swap shared between the requester and the scheduler.
///
/// Only the latest request survives until the scheduler takes it.
#[derive(Debug, Clone, Default)]
pub struct MeshRequest {
    pending: Arc<Mutex<Option<MeshKind>>>,
}

impl MeshRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, kind: MeshKind) {
        *self.pending.lock() = Some(kind);
    }

    pub fn take(&self) -> Option<MeshKind> {
        self.pending.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

/// Consumer of per-frame statistics.
pub trait Overlay {
    fn update(&mut self, stats: &FrameStats, mesh: &MeshRequest);
}

/// Overlay used when the overlay is disabled.
#[derive(Debug, Default)]
pub struct NoopOverlay;

impl Overlay for NoopOverlay {
    fn update(&mut self, _stats: &FrameStats, _mesh: &MeshRequest) {}
}

/// Logs a one-line summary every `interval` frames.
#[derive(Debug)]
pub struct LogOverlay {
    interval: u64,
    last_logged: u64,
}

impl LogOverlay {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            last_logged: 0,
        }
    }

    fn due(&self, frame_count: u64) -> bool {
        frame_count >= self.last_logged + self.interval
    }
}

impl Default for LogOverlay {
    fn default() -> Self {
        Self::new(120)
    }
}

impl Overlay for LogOverlay {
    fn update(&mut self, stats: &FrameStats, _mesh: &MeshRequest) {
        if !self.due(stats.frame_count) {
            return;
        }
        self.last_logged = stats.frame_count;

        let avg_ms = stats
            .average_frame_time
            .map_or(0.0, |t| t.as_secs_f64() * 1000.0);
        tracing::info!(
            target: "lantern::overlay",
            "frame {} | {:.2} ms avg ({:.0} fps) | mesh {} ({} verts, {} indices) | {} rebuilds, {} skipped | {} buffers, {} images, {} KiB",
            stats.frame_count,
            avg_ms,
            stats.average_fps().unwrap_or(0.0),
            stats.mesh,
            stats.vertex_count,
            stats.index_count,
            stats.swapchain_rebuilds,
            stats.skipped_frames,
            stats.memory.live_buffers,
            stats.memory.live_images,
            stats.memory.allocated_bytes / 1024,
        );
    }
}

/// Overlay strategy for the configured flag.
pub fn overlay_for(enabled: bool) -> Box<dyn Overlay> {
    if enabled {
        Box::new(LogOverlay::default())
    } else {
        Box::new(NoopOverlay)
    }
}
