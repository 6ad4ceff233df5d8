//! Global push-to-talk key, backed by `rdev`.
//!
//! `rdev::listen()` blocks for the life of the process, so it runs on a
//! dedicated OS thread (see [`HotkeyListener`]).  Events reach the async side
//! through a `tokio::sync::mpsc` channel.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use ham_voice::hotkey::{parse_key, HotkeyListener};
//!
//! let (tx, mut rx) = mpsc::channel(16);
//! let key = parse_key("F9").expect("unknown key");
//! let _listener = HotkeyListener::start(key, tx).expect("listener thread");
//! // while let Some(event) = rx.recv().await { ... }
//! ```

pub mod listener;

pub use listener::{HotkeyListener, KeyLatch};

/// Events emitted by the hotkey listener thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    PushToTalkPressed,
    PushToTalkReleased,
}

/// Parse a key name from the config into an [`rdev::Key`].
///
/// Accepts F1–F12, a few named keys and single letters, case-insensitively.
///
/// ```
/// use ham_voice::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("f9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("space"), Some(rdev::Key::Space));
/// assert_eq!(parse_key("k"), Some(rdev::Key::KeyK));
/// assert_eq!(parse_key("Ctrl+V"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key;

    const FUNCTION_KEYS: [Key; 12] = [
        Key::F1, Key::F2, Key::F3, Key::F4, Key::F5, Key::F6,
        Key::F7, Key::F8, Key::F9, Key::F10, Key::F11, Key::F12,
    ];
    const LETTERS: [Key; 26] = [
        Key::KeyA, Key::KeyB, Key::KeyC, Key::KeyD, Key::KeyE, Key::KeyF, Key::KeyG,
        Key::KeyH, Key::KeyI, Key::KeyJ, Key::KeyK, Key::KeyL, Key::KeyM, Key::KeyN,
        Key::KeyO, Key::KeyP, Key::KeyQ, Key::KeyR, Key::KeyS, Key::KeyT, Key::KeyU,
        Key::KeyV, Key::KeyW, Key::KeyX, Key::KeyY, Key::KeyZ,
    ];

    let name = name.trim().to_ascii_lowercase();
    let named = match name.as_str() {
        "space" => Some(Key::Space),
        "escape" | "esc" => Some(Key::Escape),
        "capslock" => Some(Key::CapsLock),
        "scrolllock" => Some(Key::ScrollLock),
        "pause" => Some(Key::Pause),
        "insert" | "ins" => Some(Key::Insert),
        "home" => Some(Key::Home),
        "end" => Some(Key::End),
        "pageup" => Some(Key::PageUp),
        "pagedown" => Some(Key::PageDown),
        "controlright" | "rightctrl" => Some(Key::ControlRight),
        "altgr" => Some(Key::AltGr),
        _ => None,
    };
    if named.is_some() {
        return named;
    }

    if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<usize>().ok()) {
        return n.checked_sub(1).and_then(|i| FUNCTION_KEYS.get(i).copied());
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_lowercase() => LETTERS.get((c as u8 - b'a') as usize).copied(),
        _ => None,
    }
}
