//! Built-in roger beep styles.
//!
//! Every style has two renderings.  The local one plays contiguous tones
//! through the speaker.  The transmitted one inserts short silences between
//! closely spaced tones so the voice codec does not smear them together.

use serde::{Deserialize, Serialize};

use super::synth::{BeepDefinition, Tone, ToneError};

/// Where a rendered beep is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeepTarget {
    /// Played through the local speaker only.
    Local,
    /// Injected into the outbound voice stream.
    Transmitted,
}

/// Selectable roger beep styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BeepStyle {
    /// Eight rising semitones from C6.
    #[default]
    Classic8Tone,
    TwoToneHighLow,
    ThreeToneUp,
    FourToneDescend,
    ShortChirp,
    LongBeep,
    /// A single morse letter (`A`–`Z`).
    Morse(char),
    /// A user-supplied PCM clip.
    Custom,
}

const CLASSIC_FREQUENCIES: [f32; 8] = [
    1_047.0, 1_109.0, 1_175.0, 1_245.0, 1_319.0, 1_397.0, 1_480.0, 1_568.0,
];

impl BeepStyle {
    /// The tone sequence for this style.
    ///
    /// [`BeepStyle::Custom`] has no synthesized definition and yields
    /// [`ToneError::MissingCustomClip`]; callers render the clip instead.
    pub fn definition(self, target: BeepTarget) -> Result<BeepDefinition, ToneError> {
        let transmitted = target == BeepTarget::Transmitted;
        let tones = match self {
            BeepStyle::Classic8Tone => {
                let mut tones = Vec::with_capacity(16);
                for (i, &freq) in CLASSIC_FREQUENCIES.iter().enumerate() {
                    if transmitted && i > 0 {
                        tones.push(Tone::silence(10));
                    }
                    tones.push(Tone::new(freq, 40));
                }
                tones
            }
            BeepStyle::TwoToneHighLow if transmitted => vec![
                Tone::new(1_800.0, 100),
                Tone::silence(20),
                Tone::new(1_200.0, 100),
            ],
            BeepStyle::TwoToneHighLow => vec![Tone::new(1_800.0, 100), Tone::new(1_200.0, 100)],
            BeepStyle::ThreeToneUp => vec![
                Tone::new(800.0, 80),
                Tone::new(1_200.0, 80),
                Tone::new(1_600.0, 120),
            ],
            BeepStyle::FourToneDescend => vec![
                Tone::new(2_000.0, 60),
                Tone::new(1_600.0, 60),
                Tone::new(1_200.0, 60),
                Tone::new(800.0, 80),
            ],
            BeepStyle::ShortChirp => vec![Tone::new(1_500.0, 80)],
            BeepStyle::LongBeep => vec![Tone::new(1_000.0, 250)],
            BeepStyle::Morse(letter) => return BeepDefinition::morse_letter(letter),
            BeepStyle::Custom => return Err(ToneError::MissingCustomClip),
        };
        Ok(BeepDefinition::new(tones))
    }

    /// Short label for logs and settings screens.
    pub fn label(self) -> String {
        match self {
            BeepStyle::Classic8Tone => "Classic 8-tone".into(),
            BeepStyle::TwoToneHighLow => "Two-tone high/low".into(),
            BeepStyle::ThreeToneUp => "Three-tone up".into(),
            BeepStyle::FourToneDescend => "Four-tone descend".into(),
            BeepStyle::ShortChirp => "Short chirp".into(),
            BeepStyle::LongBeep => "Long beep".into(),
            BeepStyle::Morse(letter) => format!("Morse '{}'", letter.to_ascii_uppercase()),
            BeepStyle::Custom => "Custom clip".into(),
        }
    }
}
