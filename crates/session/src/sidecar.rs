//! Optional WAV sidecar with the raw captured audio.
//!
//! 16 kHz mono PCM16, so a recording can be re-transcribed from the same
//! source later.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{WavSpec, WavWriter};

use crate::RecorderError;

pub const SIDECAR_SAMPLE_RATE: u32 = 16_000;

pub struct AudioSidecar {
    writer: WavWriter<BufWriter<File>>,
}

impl AudioSidecar {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SIDECAR_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(path.as_ref(), spec)?;
        Ok(Self { writer })
    }

    /// Append float samples, clamped into PCM16.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<(), RecorderError> {
        for &sample in samples {
            let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            self.writer.write_sample(int_sample)?;
        }
        Ok(())
    }

    pub fn duration_ms(&self) -> u64 {
        (self.writer.len() as u64 * 1_000) / SIDECAR_SAMPLE_RATE as u64
    }

    pub fn finalize(self) -> Result<(), RecorderError> {
        self.writer.finalize()?;
        Ok(())
    }
}

/// Sidecar path next to a JSONL recording: same base name, `.wav`.
pub fn sidecar_path(recording: &Path) -> std::path::PathBuf {
    recording.with_extension("wav")
}
