//! Narration synthesis for Wavecast: HTTP text-to-speech with an
//! on-device fallback path and a content-addressed jingle cache.

pub mod cache;
pub mod error;
pub mod synth;

pub use cache::{content_hash, JingleCache};
pub use error::SpeechError;
pub use synth::HttpSpeechSynthesizer;
