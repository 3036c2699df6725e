//! Reply text processing: segmentation of the model stream into speakable units

pub mod segmenter;

pub use segmenter::{segment_reply, ExpressionCue, SpeakableUnit, UtteranceSegmenter};
