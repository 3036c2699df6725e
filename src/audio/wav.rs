//! WAV encoding and the lip-sync volume envelope
//!
//! Synthesized audio crosses the protocol boundary as 16-bit mono WAV
//! together with a normalized per-chunk RMS envelope the client uses to
//! drive mouth openness during playback.

use crate::{ParleyError, Result};
use std::io::Cursor;

/// Encode mono f32 samples as a 16-bit PCM WAV file in memory
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ParleyError::AudioProcessing(format!("WAV writer failed: {}", e)))?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| ParleyError::AudioProcessing(format!("WAV write failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| ParleyError::AudioProcessing(format!("WAV finalize failed: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

/// Normalized RMS volume per `slice_ms` chunk of audio
///
/// Volumes are scaled so the loudest chunk is 1.0; silent audio yields all
/// zeros rather than an error.
pub fn volume_envelope(samples: &[f32], sample_rate: u32, slice_ms: u64) -> Vec<f32> {
    if samples.is_empty() || sample_rate == 0 {
        return Vec::new();
    }
    let chunk_len = ((sample_rate as u64 * slice_ms.max(1)) / 1000).max(1) as usize;

    let mut volumes: Vec<f32> = samples
        .chunks(chunk_len)
        .map(|chunk| {
            let sum_squares: f32 = chunk.iter().map(|s| s * s).sum();
            (sum_squares / chunk.len() as f32).sqrt()
        })
        .collect();

    let max = volumes.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for v in &mut volumes {
            *v /= max;
        }
    }
    volumes
}
