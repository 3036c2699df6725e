//! Audio utilities shared by provider adapters and the gateway

pub mod resampler;
pub mod wav;

pub use resampler::resample;
pub use wav::{encode_wav, volume_envelope};
