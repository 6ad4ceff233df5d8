//! Local (speaker-only) tone playback via `cpal`.
//!
//! [`TonePlayer`] is the seam the session uses for feedback that must never
//! reach the outbound voice stream: the local roger beep after a peer's hold
//! expires, and the VOX pre-tone.  Playback is fire-and-forget.  A newer
//! request silences any tone that is still playing.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::resample::{pcm_to_f32, resample_linear};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors raised while opening or driving the output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// TonePlayer
// ---------------------------------------------------------------------------

/// Plays a mono 16-bit PCM buffer through the local speaker.
///
/// Implementations must return immediately; the caller runs on the session
/// event loop.
pub trait TonePlayer: Send + Sync {
    fn play(&self, pcm: Vec<i16>, sample_rate: u32);
}

/// Player used when no output device is available.
pub struct NullTonePlayer;

impl TonePlayer for NullTonePlayer {
    fn play(&self, pcm: Vec<i16>, _sample_rate: u32) {
        log::debug!("tone-player: no output device, dropping {} samples", pcm.len());
    }
}

// ---------------------------------------------------------------------------
// CpalTonePlayer
// ---------------------------------------------------------------------------

/// [`TonePlayer`] backed by the default cpal output device.
///
/// Each tone gets its own short-lived stream on a dedicated thread, since
/// `cpal::Stream` is not `Send`.
///
/// ```rust,no_run
/// use ham_voice::audio::{CpalTonePlayer, TonePlayer};
/// use ham_voice::tone::pure_tone;
///
/// let player = CpalTonePlayer::new().unwrap();
/// player.play(pure_tone(1_000.0, 200, 0.5, 48_000), 48_000);
/// ```
pub struct CpalTonePlayer {
    generation: Arc<AtomicU64>,
}

impl CpalTonePlayer {
    /// Verify that an output device exists and build the player.
    pub fn new() -> Result<Self, PlaybackError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(PlaybackError::NoDevice)?;
        let config = device.default_output_config()?;
        log::info!(
            "tone-player: output device ready ({} Hz, {} ch)",
            config.sample_rate().0,
            config.channels()
        );
        Ok(Self {
            generation: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl TonePlayer for CpalTonePlayer {
    fn play(&self, pcm: Vec<i16>, sample_rate: u32) {
        if pcm.is_empty() {
            return;
        }
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);

        let spawned = std::thread::Builder::new()
            .name("tone-playback".into())
            .spawn(move || {
                if let Err(e) = play_blocking(&pcm, sample_rate, ticket, generation) {
                    log::warn!("tone-player: playback failed: {e}");
                }
            });
        if let Err(e) = spawned {
            log::warn!("tone-player: failed to spawn playback thread: {e}");
        }
    }
}

/// Open the default output device, play `pcm` once and return when done.
fn play_blocking(
    pcm: &[i16],
    sample_rate: u32,
    ticket: u64,
    generation: Arc<AtomicU64>,
) -> Result<(), PlaybackError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(PlaybackError::NoDevice)?;
    let supported = device.default_output_config()?;
    let channels = supported.channels().max(1) as usize;
    let device_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let samples = resample_linear(&pcm_to_f32(pcm), sample_rate, device_rate);
    let duration = Duration::from_secs_f64(samples.len() as f64 / device_rate as f64);
    let mut cursor = 0usize;

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let superseded = generation.load(Ordering::Relaxed) != ticket;
            for frame in data.chunks_mut(channels) {
                let value = if superseded {
                    0.0
                } else {
                    samples.get(cursor).copied().unwrap_or(0.0)
                };
                cursor += 1;
                frame.fill(value);
            }
        },
        |err: cpal::StreamError| {
            log::error!("tone-player: cpal stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    // Keep the stream alive for the tone plus a little device latency.
    std::thread::sleep(duration + Duration::from_millis(50));
    Ok(())
}

// ---------------------------------------------------------------------------
// RecordingPlayer  (test-only)
// ---------------------------------------------------------------------------

/// Test double that records every playback request with its timestamp.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPlayer {
    plays: std::sync::Mutex<Vec<(tokio::time::Instant, usize)>>,
}

#[cfg(test)]
impl RecordingPlayer {
    /// `(when, sample_count)` for every tone played so far.
    pub fn plays(&self) -> Vec<(tokio::time::Instant, usize)> {
        self.plays.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TonePlayer for RecordingPlayer {
    fn play(&self, pcm: Vec<i16>, _sample_rate: u32) {
        self.plays
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), pcm.len()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CpalTonePlayer>();
        assert_send_sync::<NullTonePlayer>();
    }

    #[test]
    fn null_player_accepts_anything() {
        NullTonePlayer.play(vec![0; 480], 48_000);
        NullTonePlayer.play(Vec::new(), 0);
    }

    #[test]
    fn recording_player_counts_samples() {
        let player = RecordingPlayer::default();
        player.play(vec![1; 10], 48_000);
        player.play(vec![1; 20], 48_000);
        let sizes: Vec<usize> = player.plays().iter().map(|(_, n)| *n).collect();
        assert_eq!(sizes, vec![10, 20]);
    }
}
