//! Sample-rate and channel conversion for feedback tones.
//!
//! Tones are rendered at the engine rate (48 kHz) and custom clips arrive at
//! whatever rate they were recorded at.  [`resample_linear`] converts between
//! the two, and again to the output device rate for local playback.
//!
//! Linear interpolation is plenty for beeps that are a few hundred ms long.

// ---------------------------------------------------------------------------
// PCM conversion
// ---------------------------------------------------------------------------

/// Convert signed 16-bit PCM to `f32` in `[-1.0, 1.0)`.
pub fn pcm_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32_768.0).collect()
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample `samples` from `source_rate` to `target_rate` Hz using linear
/// interpolation.
///
/// Equal rates return a copy.  An empty input or a zero rate yields an empty
/// vector.
///
/// # Example
///
/// ```rust
/// use ham_voice::audio::resample_linear;
///
/// let clip = vec![0.5_f32; 441];
/// let out = resample_linear(&clip, 44_100, 48_000);
/// assert_eq!(out.len(), 480);
/// ```
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).round() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = (src_pos as usize).min(last);
            let frac = (src_pos - idx as f64) as f32;
            match samples.get(idx + 1) {
                Some(&next) => samples[idx] * (1.0 - frac) + next * frac,
                None => samples[idx],
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
