//! Application context.

use lantern_render::{EventQueue, FrameStats, MeshKind, MeshRequest};
use std::sync::Arc;
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Carries the window, the input queue filled by the runner, the mesh
/// request handle and the latest frame statistics. GPU objects stay inside
/// the renderer.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// Input events in arrival order.
    pub events: Arc<EventQueue>,
    /// Name of the selected GPU.
    pub gpu_name: String,
    pub(crate) mesh: MeshRequest,
    pub(crate) stats: FrameStats,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, gpu_name: String, mesh: MeshRequest) -> Self {
        Self {
            window,
            events: Arc::new(EventQueue::new()),
            gpu_name,
            mesh,
            stats: FrameStats::default(),
        }
    }

    /// Get the window's framebuffer width.
    pub fn width(&self) -> u32 {
        self.window.inner_size().width
    }

    /// Get the window's framebuffer height.
    pub fn height(&self) -> u32 {
        self.window.inner_size().height
    }

    /// Get the aspect ratio (width / height), 1.0 while minimized.
    pub fn aspect_ratio(&self) -> f32 {
        let size = self.window.inner_size();
        if size.height == 0 {
            1.0
        } else {
            size.width as f32 / size.height as f32
        }
    }

    /// Statistics from the last frame.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Ask for a mesh swap before the next frame.
    pub fn request_mesh(&self, kind: MeshKind) {
        self.mesh.request(kind);
    }
}
