//! Application configuration.

use lantern_gpu::DeviceSelectionOptions;
use lantern_render::MeshKind;
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Frame-rate cap, 0 for unlimited. Clamped to the monitor refresh rate.
    pub target_fps: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// GPU selection rules.
    pub device: DeviceSelectionOptions,
    /// Log frame statistics periodically.
    pub overlay: bool,
    /// SPIR-V vertex shader.
    pub vertex_shader: PathBuf,
    /// SPIR-V fragment shader.
    pub fragment_shader: PathBuf,
    /// Mesh shown at startup.
    pub initial_mesh: MeshKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Lantern".to_string(),
            width: 1280,
            height: 720,
            target_fps: 0,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            device: DeviceSelectionOptions::default(),
            overlay: false,
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            initial_mesh: MeshKind::Triangle,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the frame-rate cap (0 for unlimited).
    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight (at least one).
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Set the GPU selection rules.
    #[must_use]
    pub fn with_device_selection(mut self, device: DeviceSelectionOptions) -> Self {
        self.device = device;
        self
    }

    /// Enable or disable the statistics overlay.
    #[must_use]
    pub fn with_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    /// Set the SPIR-V shader paths.
    #[must_use]
    pub fn with_shaders(mut self, vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    /// Set the mesh shown at startup.
    #[must_use]
    pub fn with_initial_mesh(mut self, mesh: MeshKind) -> Self {
        self.initial_mesh = mesh;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unthrottled_double_buffered() {
        let config = AppConfig::default();
        assert_eq!(config.target_fps, 0);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert!(config.device.allow_integrated);
    }

    #[test]
    fn builder_sets_fields() {
        let config = AppConfig::new("test")
            .with_size(640, 480)
            .with_target_fps(30)
            .with_frames_in_flight(0)
            .with_overlay(true)
            .with_shaders("a.spv", "b.spv")
            .with_initial_mesh(MeshKind::Quad);

        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.frames_in_flight, 1);
        assert!(config.overlay);
        assert_eq!(config.vertex_shader, PathBuf::from("a.spv"));
        assert_eq!(config.initial_mesh, MeshKind::Quad);
    }
}
