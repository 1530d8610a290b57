//! Frame pipeline for the Lantern renderer.
//!
//! This crate provides:
//! - The frame scheduler state machine and its Vulkan backend
//! - Per-swapchain-image frame resources
//! - The built-in mesh table
//! - Camera, transform snapshot and the input event queue
//! - Frame pacing, statistics and the debug overlay strategy

pub mod camera;
pub mod error;
pub mod events;
pub mod frame_resources;
pub mod mesh;
pub mod overlay;
pub mod pacing;
pub mod renderer;
pub mod scheduler;
pub mod shaders;

pub use camera::{Camera, Movable, TransformUniforms};
pub use error::{RenderError, Result};
pub use events::{EventQueue, InputEvent, MoveKey};
pub use frame_resources::{FrameResources, FrameSlot};
pub use mesh::{MeshBuffers, MeshKind, Vertex};
pub use overlay::{overlay_for, FrameStats, LogOverlay, MeshRequest, NoopOverlay, Overlay};
pub use pacing::{effective_fps_cap, FramePacer, FrameTimeHistory, FRAME_TIME_HISTORY};
pub use renderer::{Renderer, RendererConfig, ShaderSet};
pub use scheduler::{FrameBackend, FrameOutcome, FrameScheduler, SchedulerState};
pub use shaders::ShaderBlob;
