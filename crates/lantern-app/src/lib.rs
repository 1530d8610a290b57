//! Application framework for the Lantern renderer.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - GPU context and renderer initialization
//! - Swapchain rebuilds on resize
//! - Input translation into the renderer's event queue
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use lantern_app::{run_app, AppConfig, AppContext, Camera, LanternApp, Mat4, TransformUniforms};
//!
//! struct MyApp {
//!     camera: Camera,
//! }
//!
//! impl LanternApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         let mut camera = Camera::default();
//!         camera.set_aspect(ctx.aspect_ratio());
//!         Ok(MyApp { camera })
//!     }
//!
//!     fn update(&mut self, ctx: &AppContext, dt: f32) {
//!         while let Some(_event) = ctx.events.pop() {
//!             // Input handling
//!         }
//!     }
//!
//!     fn transform(&self) -> TransformUniforms {
//!         self.camera.transform(Mat4::IDENTITY)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod config;
mod context;
pub mod input;
mod runner;

pub use app::LanternApp;
pub use config::AppConfig;
pub use context::AppContext;
pub use runner::run_app;

// Re-export commonly used types for convenience
pub use glam::{Mat4, Vec3};
pub use lantern_gpu::DeviceSelectionOptions;
pub use lantern_render::{
    Camera, FrameStats, InputEvent, MeshKind, MoveKey, Movable, TransformUniforms,
};
pub use winit::event::{DeviceEvent, WindowEvent};
