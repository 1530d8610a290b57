//! Input events handed from the window thread to the scene.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Movement directions a key can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKey {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

/// A discrete input event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key { key: MoveKey, pressed: bool },
    /// Relative pointer motion in pixels.
    MouseMotion { dx: f64, dy: f64 },
}

/// FIFO of input events behind a mutex.
///
/// The window collaborator pushes, the scene pops one event at a time.
/// Events are neither reordered nor merged.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<InputEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: InputEvent) {
        self.events.lock().push_back(event);
    }

    pub fn pop(&self) -> Option<InputEvent> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pops_in_push_order() {
        let queue = EventQueue::new();
        queue.push(InputEvent::Key {
            key: MoveKey::Forward,
            pressed: true,
        });
        queue.push(InputEvent::MouseMotion { dx: 1.0, dy: 0.0 });
        queue.push(InputEvent::MouseMotion { dx: 1.0, dy: 0.0 });

        assert_eq!(queue.len(), 3);
        assert!(matches!(queue.pop(), Some(InputEvent::Key { .. })));
        assert!(matches!(queue.pop(), Some(InputEvent::MouseMotion { .. })));
        assert!(matches!(queue.pop(), Some(InputEvent::MouseMotion { .. })));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn producer_thread_feeds_consumer() {
        let queue = Arc::new(EventQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..100 {
                    queue.push(InputEvent::MouseMotion {
                        dx: f64::from(i),
                        dy: 0.0,
                    });
                }
            })
        };
        producer.join().unwrap();

        let mut expected = 0.0;
        while let Some(InputEvent::MouseMotion { dx, .. }) = queue.pop() {
            assert!((dx - expected).abs() < f64::EPSILON);
            expected += 1.0;
        }
        assert!((expected - 100.0).abs() < f64::EPSILON);
    }
}
