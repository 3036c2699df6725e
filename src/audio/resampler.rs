//! Mono sample-rate conversion for provider adapters
//!
//! Everything inside the pipeline runs at the boundary rate; providers whose
//! models speak another rate convert here, at the adapter edge.

use crate::{ParleyError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Frames fed to the resampler per call
const CHUNK_FRAMES: usize = 1024;

/// Resample a mono buffer in one call
///
/// Returns the input unchanged when the rates already match.
pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == 0 || output_rate == 0 {
        return Err(ParleyError::AudioProcessing(
            "Sample rates must be greater than 0".into(),
        ));
    }
    if input_rate == output_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, 1)
        .map_err(|e| ParleyError::AudioProcessing(format!("Failed to create resampler: {}", e)))?;

    let mut output = Vec::with_capacity((input.len() as f64 * ratio * 1.1) as usize);
    let mut offset = 0;

    while offset < input.len() {
        let take = (input.len() - offset).min(CHUNK_FRAMES);

        // SincFixedIn wants exactly CHUNK_FRAMES per call; the final short
        // chunk is zero-padded and its output trimmed proportionally
        let mut chunk = vec![0.0f32; CHUNK_FRAMES];
        chunk[..take].copy_from_slice(&input[offset..offset + take]);

        let processed = resampler
            .process(&[chunk], None)
            .map_err(|e| ParleyError::AudioProcessing(format!("Resampling failed: {}", e)))?;

        let produced = &processed[0];
        let keep = if take < CHUNK_FRAMES {
            ((take as f64 * ratio).ceil() as usize).min(produced.len())
        } else {
            produced.len()
        };
        output.extend_from_slice(&produced[..keep]);

        offset += take;
    }

    debug!(
        "Resampled {} samples at {} Hz to {} samples at {} Hz",
        input.len(),
        input_rate,
        output.len(),
        output_rate
    );

    Ok(output)
}
