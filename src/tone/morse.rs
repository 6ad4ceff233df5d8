//! Morse letter expansion.
//!
//! Timing follows the usual 1:3 dit/dah ratio at a fixed speed:
//!
//! | Element         | Duration |
//! |-----------------|----------|
//! | dit             | 60 ms    |
//! | dah             | 180 ms   |
//! | intra-letter gap| 60 ms    |
//!
//! All elements are keyed at 1000 Hz.  There is no gap after the last
//! element, so the tone ends exactly when the letter does.

use super::synth::Tone;

pub const DIT_MS: u32 = 60;
pub const DAH_MS: u32 = 180;
pub const GAP_MS: u32 = 60;
pub const FREQUENCY_HZ: f32 = 1_000.0;

const LETTERS: [&str; 26] = [
    ".-", "-...", "-.-.", "-..", ".", "..-.", "--.", "....", "..", ".---", "-.-", ".-..", "--",
    "-.", "---", ".--.", "--.-", ".-.", "...", "-", "..-", "...-", ".--", "-..-", "-.--", "--..",
];

/// Dot/dash pattern for an ASCII letter (case-insensitive).
///
/// ```
/// use ham_voice::tone::morse::pattern_for;
///
/// assert_eq!(pattern_for('K'), Some("-.-"));
/// assert_eq!(pattern_for('k'), Some("-.-"));
/// assert_eq!(pattern_for('7'), None);
/// ```
pub fn pattern_for(letter: char) -> Option<&'static str> {
    let upper = letter.to_ascii_uppercase();
    upper
        .is_ascii_uppercase()
        .then(|| LETTERS[(upper as u8 - b'A') as usize])
}

/// Expand a dot/dash pattern into tones, dropping the trailing gap.
///
/// Characters other than `.` and `-` are skipped.
pub fn expand(pattern: &str) -> Vec<Tone> {
    let mut tones = Vec::with_capacity(pattern.len() * 2);
    for symbol in pattern.chars() {
        let duration_ms = match symbol {
            '.' => DIT_MS,
            '-' => DAH_MS,
            _ => continue,
        };
        tones.push(Tone::new(FREQUENCY_HZ, duration_ms));
        tones.push(Tone::silence(GAP_MS));
    }
    tones.pop();
    tones
}
