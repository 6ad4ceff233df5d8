//! Sine synthesis and level normalization.

use std::f32::consts::TAU;
use std::path::PathBuf;

use thiserror::Error;

/// Native sample rate of the voice engine and of every rendered tone.
pub const ENGINE_SAMPLE_RATE: u32 = 48_000;

/// Peak level every rendered tone is normalized to before volume is applied
/// (≈ 90 % of full scale).
pub const HEADROOM_PEAK: f32 = 29_490.0;

// ---------------------------------------------------------------------------
// ToneError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ToneError {
    #[error("no morse code for character {0:?}")]
    UnknownMorseLetter(char),

    #[error("custom beep selected but no clip is loaded")]
    MissingCustomClip,

    #[error("custom clip {path} could not be read: {source}")]
    ClipIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("custom clip {path} is not a supported audio file: {source}")]
    ClipFormat {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("custom clip contains no samples")]
    EmptyClip,

    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),
}

// ---------------------------------------------------------------------------
// Tone
// ---------------------------------------------------------------------------

/// One segment of a beep: a sine at `frequency_hz` or silence when the
/// frequency is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration_ms: u32,
}

impl Tone {
    pub const fn new(frequency_hz: f32, duration_ms: u32) -> Self {
        Self {
            frequency_hz,
            duration_ms,
        }
    }

    pub const fn silence(duration_ms: u32) -> Self {
        Self::new(0.0, duration_ms)
    }

    pub fn is_silence(&self) -> bool {
        self.frequency_hz <= 0.0
    }

    /// `sample_rate * duration_ms / 1000`, truncated.
    pub fn sample_count(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.duration_ms as u64 / 1_000) as usize
    }
}

// ---------------------------------------------------------------------------
// BeepDefinition
// ---------------------------------------------------------------------------

/// An ordered list of tones.  Pure data; see [`super::BeepStyle`] for the
/// built-in definitions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeepDefinition {
    tones: Vec<Tone>,
}

impl BeepDefinition {
    pub fn new(tones: Vec<Tone>) -> Self {
        Self { tones }
    }

    /// Build a definition from a dot/dash pattern such as `"-.-"`.
    pub fn morse(pattern: &str) -> Self {
        Self::new(super::morse::expand(pattern))
    }

    /// Morse definition for a single letter.
    pub fn morse_letter(letter: char) -> Result<Self, ToneError> {
        super::morse::pattern_for(letter)
            .map(Self::morse)
            .ok_or(ToneError::UnknownMorseLetter(letter))
    }

    pub fn tones(&self) -> &[Tone] {
        &self.tones
    }

    pub fn duration_ms(&self) -> u32 {
        self.tones.iter().map(|t| t.duration_ms).sum()
    }

    /// Total samples, computed per segment so truncation matches [`synthesize`].
    pub fn sample_count(&self, sample_rate: u32) -> usize {
        self.tones.iter().map(|t| t.sample_count(sample_rate)).sum()
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Render `definition` at unit amplitude.  The phase restarts for every tone.
pub fn synthesize(definition: &BeepDefinition, sample_rate: u32) -> Vec<f32> {
    let mut out = Vec::with_capacity(definition.sample_count(sample_rate));
    for tone in definition.tones() {
        let count = tone.sample_count(sample_rate);
        if tone.is_silence() {
            out.resize(out.len() + count, 0.0);
            continue;
        }
        let step = TAU * tone.frequency_hz / sample_rate as f32;
        out.extend((0..count).map(|i| (step * i as f32).sin()));
    }
    out
}

/// Scale `samples` so the loudest one sits at [`HEADROOM_PEAK`], then apply
/// `volume` (clamped to `0.0..=1.0`).
///
/// Silence stays silence.
pub fn normalize(samples: &[f32], volume: f32) -> Vec<i16> {
    let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
    if peak <= f32::EPSILON {
        return vec![0; samples.len()];
    }
    let gain = HEADROOM_PEAK * volume.clamp(0.0, 1.0) / peak;
    samples
        .iter()
        .map(|&s| (s * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// A single sine at `volume` × full scale, without normalization.
///
/// Used for the VOX pre-tone, which is meant to be inaudible but strong.
pub fn pure_tone(frequency_hz: f32, duration_ms: u32, volume: f32, sample_rate: u32) -> Vec<i16> {
    let amplitude = i16::MAX as f32 * volume.clamp(0.0, 1.0);
    let definition = BeepDefinition::new(vec![Tone::new(frequency_hz, duration_ms)]);
    synthesize(&definition, sample_rate)
        .into_iter()
        .map(|s| (s * amplitude) as i16)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
