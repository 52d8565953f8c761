//! Input injection seam.
//!
//! Platform injection lives outside the core behind [`InputStub`]. Each
//! client session wraps the host's stub in an [`InputTracker`] so that keys
//! and buttons still held when the client goes away are released.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::protocol::message::{EventMessage, KeyEvent, MouseButton, MouseEvent, MouseEventKind};

pub trait InputStub: Send + Sync {
    fn inject_key(&self, event: &KeyEvent);
    fn inject_mouse(&self, event: &MouseEvent);
}

/// Stub for hosts without an injection backend; logs and drops events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInputStub;

impl InputStub for LoggingInputStub {
    fn inject_key(&self, event: &KeyEvent) {
        debug!(keycode = event.usb_keycode, pressed = event.pressed, "key event");
    }

    fn inject_mouse(&self, event: &MouseEvent) {
        trace!(x = event.x, y = event.y, kind = ?event.kind, "mouse event");
    }
}

/// Forwards events and remembers what is held down.
pub struct InputTracker {
    inner: Arc<dyn InputStub>,
    keys: HashSet<u32>,
    buttons: HashSet<MouseButton>,
    position: (i32, i32),
}

impl InputTracker {
    pub fn new(inner: Arc<dyn InputStub>) -> Self {
        Self {
            inner,
            keys: HashSet::new(),
            buttons: HashSet::new(),
            position: (0, 0),
        }
    }

    pub fn inject(&mut self, event: &EventMessage) {
        match event {
            EventMessage::Key(key) => self.inject_key(key),
            EventMessage::Mouse(mouse) => self.inject_mouse(mouse),
        }
    }

    pub fn inject_key(&mut self, event: &KeyEvent) {
        if event.pressed {
            self.keys.insert(event.usb_keycode);
        } else {
            self.keys.remove(&event.usb_keycode);
        }
        self.inner.inject_key(event);
    }

    pub fn inject_mouse(&mut self, event: &MouseEvent) {
        self.position = (event.x, event.y);
        match event.kind {
            MouseEventKind::Press if event.button != MouseButton::None => {
                self.buttons.insert(event.button);
            }
            MouseEventKind::Release => {
                self.buttons.remove(&event.button);
            }
            _ => {}
        }
        self.inner.inject_mouse(event);
    }

    pub fn held_keys(&self) -> usize {
        self.keys.len()
    }

    /// Release everything still held.
    pub fn release_all(&mut self) {
        let mut keys: Vec<u32> = self.keys.drain().collect();
        keys.sort_unstable();
        for keycode in keys {
            self.inner.inject_key(&KeyEvent::release(keycode, Default::default()));
        }
        let (x, y) = self.position;
        for button in self.buttons.drain() {
            self.inner.inject_mouse(&MouseEvent::release(x, y, button));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::message::KeyModifiers;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EventMessage>>);

    impl InputStub for Recorder {
        fn inject_key(&self, event: &KeyEvent) {
            self.0.lock().unwrap().push(EventMessage::Key(*event));
        }
        fn inject_mouse(&self, event: &MouseEvent) {
            self.0.lock().unwrap().push(EventMessage::Mouse(*event));
        }
    }

    #[test]
    fn held_input_is_released() {
        let stub = Arc::new(Recorder::default());
        let mut tracker = InputTracker::new(stub.clone());
        tracker.inject(&EventMessage::Key(KeyEvent::press(0x04, KeyModifiers::SHIFT)));
        tracker.inject(&EventMessage::Key(KeyEvent::press(0x05, KeyModifiers::empty())));
        tracker.inject(&EventMessage::Key(KeyEvent::release(0x05, KeyModifiers::empty())));
        tracker.inject(&EventMessage::Mouse(MouseEvent::press(10, 20, MouseButton::Left)));
        assert_eq!(tracker.held_keys(), 1);

        tracker.release_all();
        let events = stub.0.lock().unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[4],
            EventMessage::Key(KeyEvent::release(0x04, KeyModifiers::empty()))
        );
        assert_eq!(
            events[5],
            EventMessage::Mouse(MouseEvent::release(10, 20, MouseButton::Left))
        );
        drop(events);
        assert_eq!(tracker.held_keys(), 0);
    }
}
