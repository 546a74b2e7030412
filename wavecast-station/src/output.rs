//! Narration output for the headless station client.
//!
//! A browser client plays bulletin audio through its media elements; this
//! client has no speakers of its own, so the output logs what would sound
//! and models clip time, which keeps the engines' pacing and ducking
//! windows realistic for anything monitoring the station.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;
use wavecast_core::{NarrationOutput, Result};

/// Rough playback time per synthesized kilobyte.
const MILLIS_PER_KB: u64 = 60;

pub struct LogNarrationOutput;

impl LogNarrationOutput {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn clip_time(audio: &[u8]) -> Duration {
        let kb = (audio.len() as u64).div_ceil(1024);
        Duration::from_millis(kb.saturating_mul(MILLIS_PER_KB).min(60_000))
    }
}

impl Default for LogNarrationOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NarrationOutput for LogNarrationOutput {
    async fn play_bed(&self, audio: &[u8], volume: f32) -> Result<()> {
        info!("Bed rolling ({} bytes at {volume})", audio.len());
        Ok(())
    }

    async fn fade_out_bed(&self) {
        info!("Bed fading out");
    }

    async fn play_clip(&self, audio: &[u8]) -> Result<()> {
        let time = Self::clip_time(audio);
        info!("Playing clip ({} bytes, ~{time:?})", audio.len());
        tokio::time::sleep(time).await;
        Ok(())
    }

    async fn speak(&self, text: &str) -> Result<()> {
        info!("On-device voice: {text}");
        // Ballpark natural speaking rate.
        let words = text.split_whitespace().count() as u64;
        tokio::time::sleep(Duration::from_millis((words * 400).min(60_000))).await;
        Ok(())
    }

    async fn stop(&self) {}
}
