//! ToneSynthesizer: roger beeps, morse letters and the VOX pre-tone.
//!
//! Everything here is pure: a [`BeepDefinition`] (ordered
//! `(frequency, duration)` pairs) goes in, 16-bit mono PCM comes out.
//!
//! # Render pipeline
//!
//! ```text
//! BeepStyle ──definition(target)──▶ BeepDefinition ──synthesize──▶ f32 @ rate
//! CustomClip ──────────────resampled(rate)─────────────────────▶ f32 @ rate
//!                                                                   │
//!                                  normalize(peak 29490) × volume ◀─┘
//!                                                 │
//!                                                 ▼
//!                                             Vec<i16>
//! ```
//!
//! Each segment contributes `sample_rate * duration_ms / 1000` samples, so
//! the total length is always the sum of the segment lengths.

pub mod clip;
pub mod morse;
pub mod style;
pub mod synth;

pub use clip::{CustomClip, FeedbackTone};
pub use style::{BeepStyle, BeepTarget};
pub use synth::{
    normalize, pure_tone, synthesize, BeepDefinition, Tone, ToneError, ENGINE_SAMPLE_RATE,
    HEADROOM_PEAK,
};
