//! Viewer application: a spinning mesh and a free camera.

use std::f32::consts::TAU;

use glam::{Mat4, Vec3};
use tracing::info;
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use lantern_app::{AppContext, Camera, LanternApp, Movable, TransformUniforms};

/// Model rotation speed in radians per second.
const SPIN_SPEED: f32 = 0.8;

/// Viewer application state.
pub struct Viewer {
    /// Camera driven by the input queue.
    movable: Movable,
    /// Model rotation around Y in radians.
    angle: f32,
    /// Whether the model rotates.
    spinning: bool,
}

impl Viewer {
    fn new(camera: Camera) -> Self {
        Self {
            movable: Movable::Camera(camera),
            angle: 0.0,
            spinning: true,
        }
    }

    fn advance(&mut self, dt: f32) {
        if self.spinning {
            self.angle = (self.angle + SPIN_SPEED * dt).rem_euclid(TAU);
        }
    }

    fn model(&self) -> Mat4 {
        Mat4::from_rotation_y(self.angle)
    }
}

impl LanternApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        info!("Rendering on {}", ctx.gpu_name);
        info!("Controls: WASD/arrows move, Space/Ctrl up/down, mouse looks");
        info!("          M cycles meshes, P toggles spin, Esc quits");

        let mut camera = Camera::looking_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO);
        camera.set_viewport(ctx.width(), ctx.height());

        Ok(Self::new(camera))
    }

    fn update(&mut self, ctx: &AppContext, dt: f32) {
        while let Some(event) = ctx.events.pop() {
            self.movable.handle_event(&event);
        }
        self.advance(dt);
    }

    fn transform(&self) -> TransformUniforms {
        self.movable
            .camera()
            .map(|camera| camera.transform(self.model()))
            .unwrap_or_default()
    }

    fn on_resize(&mut self, _ctx: &AppContext, width: u32, height: u32) {
        if let Some(camera) = self.movable.camera_mut() {
            camera.set_viewport(width, height);
        }
    }

    fn on_event(&mut self, _ctx: &AppContext, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.physical_key == PhysicalKey::Code(KeyCode::KeyP)
                && event.state == ElementState::Pressed
                && !event.repeat
            {
                self.spinning = !self.spinning;
                return true;
            }
        }
        false
    }
}
