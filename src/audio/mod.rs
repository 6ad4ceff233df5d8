//! Local audio output and sample conversion.
//!
//! ```text
//! FeedbackTone::render ─▶ Vec<i16> @ 48 kHz ─▶ TonePlayer::play
//!                                               └─▶ resample_linear → cpal stream
//! ```

pub mod player;
pub mod resample;

#[cfg(test)]
pub use player::RecordingPlayer;
pub use player::{CpalTonePlayer, NullTonePlayer, PlaybackError, TonePlayer};
pub use resample::{pcm_to_f32, resample_linear};
