//! `LanternApp` trait definition.

use crate::context::AppContext;
use lantern_render::TransformUniforms;
use winit::event::WindowEvent;

/// Trait for Lantern applications.
///
/// The application owns the scene: it drains input from
/// [`AppContext::events`] and hands the renderer one transform snapshot per
/// frame. Window creation, GPU setup, the swapchain and the frame loop are
/// handled by the framework.
pub trait LanternApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and renderer have been created.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering.
    ///
    /// # Arguments
    /// * `ctx` - Application context with window, input queue and statistics
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Model, view and projection for the next frame.
    fn transform(&self) -> TransformUniforms;

    /// Handle window resize.
    ///
    /// The framework schedules the swapchain rebuild; use this for
    /// size-dependent state such as the camera aspect ratio.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &AppContext, width: u32, height: u32) {}

    /// Handle window events.
    ///
    /// Called for each window event. Return `true` if the event was
    /// handled and should not be processed further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup before shutdown. The GPU is idle when this is called.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &AppContext) {}
}
