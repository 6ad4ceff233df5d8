//! Custom clips and the configured feedback tone.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::audio::{pcm_to_f32, resample_linear};
use crate::config::RogerBeepConfig;

use super::style::{BeepStyle, BeepTarget};
use super::synth::{normalize, synthesize, ToneError};

// ---------------------------------------------------------------------------
// CustomClip
// ---------------------------------------------------------------------------

/// A user-supplied mono clip, capped at [`CustomClip::MAX_DURATION_MS`].
#[derive(Debug, Clone, PartialEq)]
pub struct CustomClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl CustomClip {
    pub const MAX_DURATION_MS: u32 = 5_000;

    /// Wrap 16-bit samples, truncating anything past the duration cap.
    pub fn from_pcm(samples: &[i16], sample_rate: u32) -> Result<Self, ToneError> {
        Self::from_samples(pcm_to_f32(samples), sample_rate)
    }

    fn from_samples(mut samples: Vec<f32>, sample_rate: u32) -> Result<Self, ToneError> {
        if sample_rate == 0 {
            return Err(ToneError::InvalidSampleRate(sample_rate));
        }
        if samples.is_empty() {
            return Err(ToneError::EmptyClip);
        }
        let cap = (sample_rate as u64 * Self::MAX_DURATION_MS as u64 / 1_000) as usize;
        if samples.len() > cap {
            log::debug!(
                "tone: custom clip truncated to {} ms ({} of {} samples)",
                Self::MAX_DURATION_MS,
                cap,
                samples.len()
            );
            samples.truncate(cap);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Load a clip file.  `.raw` and `.pcm` files are headerless and played
    /// at `raw_sample_rate`; anything else must be a WAV file, which carries
    /// its own rate and channel count.
    pub fn load(path: &Path, raw_sample_rate: u32) -> Result<Self, ToneError> {
        let headerless = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("raw") || ext.eq_ignore_ascii_case("pcm"));
        if headerless {
            Self::load_raw_pcm(path, raw_sample_rate)
        } else {
            Self::load_wav(path)
        }
    }

    /// Decode a WAV file of any rate, bit depth and channel count.
    /// Channels are averaged down to mono.
    pub fn load_wav(path: &Path) -> Result<Self, ToneError> {
        let file = File::open(path).map_err(|source| ToneError::ClipIo {
            path: path.to_path_buf(),
            source,
        })?;
        let (samples, sample_rate) = hound::WavReader::new(BufReader::new(file))
            .and_then(decode_wav)
            .map_err(|source| ToneError::ClipFormat {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_samples(samples, sample_rate)
    }

    /// Read a headerless signed 16-bit little-endian mono file.
    pub fn load_raw_pcm(path: &Path, sample_rate: u32) -> Result<Self, ToneError> {
        let bytes = std::fs::read(path).map_err(|source| ToneError::ClipIo {
            path: path.to_path_buf(),
            source,
        })?;
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_pcm(&samples, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u32 {
        (self.samples.len() as u64 * 1_000 / self.sample_rate as u64) as u32
    }

    /// The clip converted to `target_rate`, at its original level.
    pub fn resampled(&self, target_rate: u32) -> Vec<f32> {
        resample_linear(&self.samples, self.sample_rate, target_rate)
    }
}

fn decode_wav<R: Read>(reader: hound::WavReader<R>) -> Result<(Vec<f32>, u32), hound::Error> {
    let spec = reader.spec();
    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = 2f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / full_scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    let channels = usize::from(spec.channels.max(1));
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

// ---------------------------------------------------------------------------
// FeedbackTone
// ---------------------------------------------------------------------------

/// A ready-to-render roger beep: style, volume and (for
/// [`BeepStyle::Custom`]) the loaded clip.
///
/// ```
/// use ham_voice::tone::{BeepStyle, BeepTarget, FeedbackTone};
///
/// let tone = FeedbackTone::new(BeepStyle::Morse('K'), 0.7);
/// let pcm = tone.render(BeepTarget::Transmitted, 48_000).unwrap();
/// assert_eq!(pcm.len(), 48 * 540);
/// ```
#[derive(Debug, Clone)]
pub struct FeedbackTone {
    style: BeepStyle,
    volume: f32,
    clip: Option<Arc<CustomClip>>,
}

impl FeedbackTone {
    pub fn new(style: BeepStyle, volume: f32) -> Self {
        Self {
            style,
            volume: volume.clamp(0.0, 1.0),
            clip: None,
        }
    }

    pub fn with_clip(mut self, clip: CustomClip) -> Self {
        self.clip = Some(Arc::new(clip));
        self
    }

    /// Build from settings, loading the custom clip when one is configured.
    ///
    /// A clip that fails to load is logged and left out; rendering then
    /// reports [`ToneError::MissingCustomClip`].
    pub fn from_config(config: &RogerBeepConfig) -> Self {
        let tone = Self::new(config.style, config.volume);
        if config.style != BeepStyle::Custom {
            return tone;
        }
        let Some(clip_config) = &config.custom_clip else {
            log::warn!("tone: custom beep selected but no clip path configured");
            return tone;
        };
        let path = clip_config.resolved_path();
        match CustomClip::load(&path, clip_config.sample_rate) {
            Ok(clip) => {
                log::info!(
                    "tone: loaded custom clip {} ({} ms)",
                    path.display(),
                    clip.duration_ms()
                );
                tone.with_clip(clip)
            }
            Err(e) => {
                log::warn!("tone: {e}");
                tone
            }
        }
    }

    pub fn style(&self) -> BeepStyle {
        self.style
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Render to 16-bit PCM: synthesize (or resample the clip), normalize to
    /// the headroom target, then apply the volume.
    pub fn render(&self, target: BeepTarget, sample_rate: u32) -> Result<Vec<i16>, ToneError> {
        if sample_rate == 0 {
            return Err(ToneError::InvalidSampleRate(sample_rate));
        }
        let raw = match self.style {
            BeepStyle::Custom => self
                .clip
                .as_ref()
                .ok_or(ToneError::MissingCustomClip)?
                .resampled(sample_rate),
            style => synthesize(&style.definition(target)?, sample_rate),
        };
        Ok(normalize(&raw, self.volume))
    }
}
