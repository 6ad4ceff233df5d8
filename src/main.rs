//! Application entry point for the ham-radio voice client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build collaborators: loopback engine, hardware PTT, tone player,
//!    trust store and identity provider.
//! 5. Spawn the session actor and a task that logs its notices.
//! 6. Spawn the hotkey listener thread and bridge it to PTT press/release.
//! 7. Auto-connect the first `auto_connect` server.
//! 8. Wait for Ctrl-C, disconnect, and let the session wind down.

use std::sync::Arc;

use tokio::sync::mpsc;

use ham_voice::{
    audio::{CpalTonePlayer, NullTonePlayer, TonePlayer},
    config::AppConfig,
    engine::{EngineEvent, LoopbackEngine},
    hardware::{CommandPttLine, HardwarePtt, PttTiming},
    hotkey::{parse_key, HotkeyEvent, HotkeyListener},
    session::{Collaborators, Session, SessionHandle, SessionNotice, SessionSettings},
    trust::{EphemeralIdentityProvider, MemoryTrustStore},
};

// ---------------------------------------------------------------------------
// Collaborator builders
// ---------------------------------------------------------------------------

async fn build_hardware_ptt(config: &AppConfig) -> HardwarePtt {
    if !config.hardware_ptt.enabled {
        return HardwarePtt::disabled();
    }

    let line = match CommandPttLine::from_config(&config.hardware_ptt) {
        Ok(line) => line,
        Err(e) => {
            log::warn!("Hardware PTT misconfigured ({e}); keying disabled");
            return HardwarePtt::disabled();
        }
    };

    match HardwarePtt::connect(Box::new(line), PttTiming::from_config(&config.hardware_ptt)).await
    {
        Ok(ptt) => {
            log::info!("Hardware PTT connected");
            ptt
        }
        Err(e) => {
            log::warn!("Hardware PTT unavailable ({e}); keying disabled");
            HardwarePtt::disabled()
        }
    }
}

fn build_player() -> Arc<dyn TonePlayer> {
    match CpalTonePlayer::new() {
        Ok(player) => Arc::new(player),
        Err(e) => {
            log::warn!("Audio output unavailable ({e}); local tones muted");
            Arc::new(NullTonePlayer)
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn log_notices(mut notices: mpsc::Receiver<SessionNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            SessionNotice::ReconnectGaveUp { .. }
            | SessionNotice::PermissionDenied { .. }
            | SessionNotice::HardwarePttLost
            | SessionNotice::FeedbackFailed { .. } => log::warn!("{notice}"),
            _ => log::info!("{notice}"),
        }
    }
}

async fn bridge_hotkey(handle: SessionHandle, mut hotkeys: mpsc::Receiver<HotkeyEvent>) {
    while let Some(event) = hotkeys.recv().await {
        let result = match event {
            HotkeyEvent::PushToTalkPressed => handle.ptt_pressed().await,
            HotkeyEvent::PushToTalkReleased => handle.ptt_released().await,
        };
        if result.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("ham-voice starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime (2 worker threads: the session actor and blocking hand-offs)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    rt.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 4. Collaborators
    let (event_tx, event_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let collaborators = Collaborators {
        engine: Arc::new(LoopbackEngine::new(event_tx)),
        hardware_ptt: build_hardware_ptt(&config).await,
        player: build_player(),
        trust: Arc::new(MemoryTrustStore::new()),
        identity: Arc::new(EphemeralIdentityProvider::new()),
    };

    // 5. Session actor
    let (session, handle, notices) =
        Session::new(SessionSettings::from_config(&config), collaborators);
    let session_task = tokio::spawn(session.run(event_rx));
    let notice_task = tokio::spawn(log_notices(notices));

    // 6. Hotkey listener thread
    let (hotkey_tx, hotkey_rx) = mpsc::channel::<HotkeyEvent>(16);
    let hotkey_key = parse_key(&config.hotkey.push_to_talk_key).unwrap_or_else(|| {
        log::warn!(
            "Unknown push-to-talk key {:?}; using F9",
            config.hotkey.push_to_talk_key
        );
        rdev::Key::F9
    });
    let _hotkey_listener = match HotkeyListener::start(hotkey_key, hotkey_tx) {
        Ok(listener) => Some(listener),
        Err(e) => {
            log::warn!("Hotkey listener unavailable: {e}");
            None
        }
    };
    let bridge_task = tokio::spawn(bridge_hotkey(handle.clone(), hotkey_rx));

    // 7. Auto-connect
    handle.set_network_available(true).await?;
    match config.auto_connect_server() {
        Some(target) => {
            log::info!("Auto-connecting to {}", target.label());
            handle.connect(target.clone()).await?;
        }
        None => log::info!("No auto-connect server configured"),
    }

    // 8. Shutdown
    tokio::signal::ctrl_c().await?;
    log::info!("Interrupted; disconnecting");
    handle.disconnect(true).await?;

    bridge_task.abort();
    drop(handle);
    session_task.await?;
    notice_task.await?;
    log::info!("ham-voice stopped");
    Ok(())
}
