//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! # Shutdown caveat
//!
//! `rdev::listen` has no graceful shutdown API.  Dropping the
//! [`HotkeyListener`] sets a stop flag so events are no longer forwarded, but
//! the thread stays blocked in rdev until the process exits.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use super::HotkeyEvent;

/// Turns raw press/release reports for one key into edge events.
///
/// Holding a key makes the OS repeat `KeyPress`; only the first one counts,
/// so a held PTT key produces exactly one press and one release.
#[derive(Debug, Default)]
pub struct KeyLatch {
    pressed: bool,
}

impl KeyLatch {
    pub fn press(&mut self) -> Option<HotkeyEvent> {
        if self.pressed {
            return None;
        }
        self.pressed = true;
        Some(HotkeyEvent::PushToTalkPressed)
    }

    pub fn release(&mut self) -> Option<HotkeyEvent> {
        if !self.pressed {
            return None;
        }
        self.pressed = false;
        Some(HotkeyEvent::PushToTalkReleased)
    }
}

/// Handle to a running hotkey listener thread.
pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    /// Never joined: `rdev::listen` does not return.
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Spawn the listener thread.  Press and release of `key` are forwarded
    /// on `tx` with `blocking_send`, since the rdev callback is not async.
    pub fn start(key: rdev::Key, tx: mpsc::Sender<HotkeyEvent>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let mut latch = KeyLatch::default();
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    let edge = match event.event_type {
                        rdev::EventType::KeyPress(k) if k == key => latch.press(),
                        rdev::EventType::KeyRelease(k) if k == key => latch.release(),
                        _ => None,
                    };
                    if let Some(edge) = edge {
                        if tx.blocking_send(edge).is_err() {
                            log::debug!("hotkey-listener: receiver dropped");
                        }
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {e:?}");
                }
            })?;

        log::info!("hotkey-listener: watching {key:?}");
        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
