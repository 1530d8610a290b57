//! Translation of winit input into [`InputEvent`]s.

use lantern_render::{InputEvent, MoveKey};
use winit::event::{DeviceEvent, ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Movement binding for a physical key.
pub fn move_key(code: KeyCode) -> Option<MoveKey> {
    match code {
        KeyCode::KeyW | KeyCode::ArrowUp => Some(MoveKey::Forward),
        KeyCode::KeyS | KeyCode::ArrowDown => Some(MoveKey::Backward),
        KeyCode::KeyA | KeyCode::ArrowLeft => Some(MoveKey::Left),
        KeyCode::KeyD | KeyCode::ArrowRight => Some(MoveKey::Right),
        KeyCode::Space => Some(MoveKey::Up),
        KeyCode::ControlLeft | KeyCode::ControlRight => Some(MoveKey::Down),
        _ => None,
    }
}

/// Movement event for a keyboard event, if the key is bound.
///
/// Key repeats are forwarded as presses so holding a key keeps moving.
pub fn keyboard_event(event: &KeyEvent) -> Option<InputEvent> {
    let PhysicalKey::Code(code) = event.physical_key else {
        return None;
    };
    move_key(code).map(|key| InputEvent::Key {
        key,
        pressed: event.state == ElementState::Pressed,
    })
}

/// Relative pointer motion from a raw device event.
pub fn device_event(event: &DeviceEvent) -> Option<InputEvent> {
    match event {
        DeviceEvent::MouseMotion { delta: (dx, dy) } => Some(InputEvent::MouseMotion {
            dx: *dx,
            dy: *dy,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasd_and_arrows_share_bindings() {
        assert_eq!(move_key(KeyCode::KeyW), move_key(KeyCode::ArrowUp));
        assert_eq!(move_key(KeyCode::KeyA), Some(MoveKey::Left));
        assert_eq!(move_key(KeyCode::ControlRight), Some(MoveKey::Down));
        assert_eq!(move_key(KeyCode::KeyM), None);
    }

    #[test]
    fn mouse_motion_is_forwarded() {
        let event = DeviceEvent::MouseMotion { delta: (3.0, -2.0) };
        assert_eq!(
            device_event(&event),
            Some(InputEvent::MouseMotion { dx: 3.0, dy: -2.0 })
        );
        assert_eq!(device_event(&DeviceEvent::Added), None);
    }
}
