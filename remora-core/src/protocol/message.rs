//! Payloads of the control and event channels.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ── Control channel ──────────────────────────────────────────────

/// Messages exchanged on the control channel, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Client asks the host to pause or resume video for this connection.
    VideoControl { enable: bool },
    /// Client's current view size; informational for the host.
    ClientResolution { width: u32, height: u32 },
    /// Space-separated capability names the sender supports.
    Capabilities { names: Vec<String> },
}

// ── Event channel ────────────────────────────────────────────────

/// Input events sent from client to host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventMessage {
    Key(KeyEvent),
    Mouse(MouseEvent),
}

/// Mouse input event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MouseEvent {
    /// X position in host screen coordinates.
    pub x: i32,
    /// Y position in host screen coordinates.
    pub y: i32,
    pub kind: MouseEventKind,
    pub button: MouseButton,
    /// Wheel delta for `Scroll` events.
    pub scroll_delta: i16,
}

impl MouseEvent {
    pub fn move_to(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            kind: MouseEventKind::Move,
            button: MouseButton::None,
            scroll_delta: 0,
        }
    }

    pub fn press(x: i32, y: i32, button: MouseButton) -> Self {
        Self {
            kind: MouseEventKind::Press,
            button,
            ..Self::move_to(x, y)
        }
    }

    pub fn release(x: i32, y: i32, button: MouseButton) -> Self {
        Self {
            kind: MouseEventKind::Release,
            button,
            ..Self::move_to(x, y)
        }
    }

    pub fn scroll(x: i32, y: i32, delta: i16) -> Self {
        Self {
            kind: MouseEventKind::Scroll,
            scroll_delta: delta,
            ..Self::move_to(x, y)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MouseEventKind {
    Move,
    Press,
    Release,
    Scroll,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MouseButton {
    None,
    Left,
    Right,
    Middle,
}

bitflags! {
    /// Modifier keys held during a key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct KeyModifiers: u8 {
        const SHIFT = 0x01;
        const CTRL  = 0x02;
        const ALT   = 0x04;
        const META  = 0x08;
    }
}

/// Keyboard input event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KeyEvent {
    /// USB HID usage code of the key.
    pub usb_keycode: u32,
    pub pressed: bool,
    pub modifiers: KeyModifiers,
}

impl KeyEvent {
    pub fn press(usb_keycode: u32, modifiers: KeyModifiers) -> Self {
        Self {
            usb_keycode,
            pressed: true,
            modifiers,
        }
    }

    pub fn release(usb_keycode: u32, modifiers: KeyModifiers) -> Self {
        Self {
            pressed: false,
            ..Self::press(usb_keycode, modifiers)
        }
    }
}
