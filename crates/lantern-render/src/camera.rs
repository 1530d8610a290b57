//! Camera and the per-frame transform snapshot.

use crate::events::{InputEvent, MoveKey};
use glam::{Mat4, Vec3};

/// Distance moved per key press.
const MOVE_STEP: f32 = 0.1;
/// Radians turned per pixel of pointer motion.
const LOOK_SENSITIVITY: f32 = 0.002;
/// Keeps the camera from flipping over the poles.
const PITCH_LIMIT: f32 = 1.54;

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 2.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Create a camera looking at `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            direction: (target - position).try_normalize().unwrap_or(Vec3::NEG_Z),
            ..Self::default()
        }
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Set the aspect ratio from a framebuffer size. Zero sizes are ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// Perspective projection with Vulkan's downward Y axis.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    fn right(&self) -> Vec3 {
        self.direction.cross(self.up).normalize_or_zero()
    }

    /// Move one step in `key`'s direction.
    pub fn step(&mut self, key: MoveKey) {
        let offset = match key {
            MoveKey::Forward => self.direction,
            MoveKey::Backward => -self.direction,
            MoveKey::Right => self.right(),
            MoveKey::Left => -self.right(),
            MoveKey::Up => self.up,
            MoveKey::Down => -self.up,
        };
        self.position += offset * MOVE_STEP;
    }

    /// Turn by pointer motion in pixels.
    pub fn look(&mut self, dx: f64, dy: f64) {
        let yaw = self.direction.x.atan2(-self.direction.z) + dx as f32 * LOOK_SENSITIVITY;
        let pitch = (self.direction.y.asin() - dy as f32 * LOOK_SENSITIVITY)
            .clamp(-PITCH_LIMIT, PITCH_LIMIT);

        self.direction = Vec3::new(
            yaw.sin() * pitch.cos(),
            pitch.sin(),
            -yaw.cos() * pitch.cos(),
        );
    }

    /// Snapshot for the uniform buffer.
    pub fn transform(&self, model: Mat4) -> TransformUniforms {
        TransformUniforms {
            model: model.to_cols_array_2d(),
            view: self.view_matrix().to_cols_array_2d(),
            projection: self.projection_matrix().to_cols_array_2d(),
        }
    }
}

/// Uniform buffer contents for one frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl Default for TransformUniforms {
    fn default() -> Self {
        Camera::default().transform(Mat4::IDENTITY)
    }
}

/// Objects that respond to input.
#[derive(Debug, Clone)]
pub enum Movable {
    Camera(Camera),
}

impl Movable {
    /// Apply one input event.
    pub fn handle_event(&mut self, event: &InputEvent) {
        match (self, event) {
            (Self::Camera(camera), InputEvent::Key { key, pressed: true }) => camera.step(*key),
            (Self::Camera(_), InputEvent::Key { pressed: false, .. }) => {}
            (Self::Camera(camera), InputEvent::MouseMotion { dx, dy }) => camera.look(*dx, *dy),
        }
    }

    pub fn camera(&self) -> Option<&Camera> {
        match self {
            Self::Camera(camera) => Some(camera),
        }
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        match self {
            Self::Camera(camera) => Some(camera),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::default();
        let gl = Mat4::perspective_rh(camera.fov, camera.aspect, camera.near, camera.far);
        let vk = camera.projection_matrix();
        assert_relative_eq!(vk.y_axis.y, -gl.y_axis.y);
        assert_relative_eq!(vk.x_axis.x, gl.x_axis.x);
    }

    #[test]
    fn transform_carries_model_matrix() {
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let uniforms = Camera::default().transform(model);
        assert_eq!(uniforms.model, model.to_cols_array_2d());
        assert_eq!(std::mem::size_of::<TransformUniforms>(), 192);
    }

    #[test]
    fn key_press_moves_camera() {
        let mut movable = Movable::Camera(Camera::default());
        movable.handle_event(&InputEvent::Key {
            key: MoveKey::Forward,
            pressed: true,
        });
        let camera = movable.camera().unwrap();
        assert_relative_eq!(camera.position.z, 2.0 - MOVE_STEP);

        movable.handle_event(&InputEvent::Key {
            key: MoveKey::Forward,
            pressed: false,
        });
        assert_relative_eq!(movable.camera().unwrap().position.z, 2.0 - MOVE_STEP);
    }

    #[test]
    fn look_keeps_direction_normalized() {
        let mut camera = Camera::default();
        camera.look(250.0, -4000.0);
        assert_relative_eq!(camera.direction.length(), 1.0, epsilon = 1e-5);
        assert!(camera.direction.y.asin() <= PITCH_LIMIT + 1e-5);
    }

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = Camera::default();
        camera.set_viewport(800, 0);
        assert_relative_eq!(camera.aspect, 16.0 / 9.0);
        camera.set_viewport(800, 400);
        assert_relative_eq!(camera.aspect, 2.0);
    }
}
