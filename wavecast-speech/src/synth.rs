//! HTTP text-to-speech synthesis.
//!
//! The service is consumed as an opaque capability: text in, audio bytes
//! out. Every failure path degrades instead of erroring upward: quota and
//! auth problems (and an unconfigured endpoint) come back as a fallback
//! instruction carrying the plain text, so the narration engine can hand
//! the script to the on-device voice and the bulletin still airs.

use crate::cache::{content_hash, JingleCache};
use crate::error::SpeechError;
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use wavecast_core::{SpeechSynthesizer, SynthesisResult};

/// Default timeout for HTTP requests (15 seconds; synthesis is slow)
const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Default number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Speech synthesis over an HTTP service, with a jingle cache in front of
/// the short repeated stingers.
pub struct HttpSpeechSynthesizer {
    client: ClientWithMiddleware,
    endpoint: String,
    api_key: Option<String>,
    cache: Option<Arc<JingleCache>>,
}

impl HttpSpeechSynthesizer {
    /// Build a synthesizer client.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        cache: Option<Arc<JingleCache>>,
    ) -> Result<Self, SpeechError> {
        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("Wavecast/0.1")
            .build()?;

        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(DEFAULT_MAX_RETRIES);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            cache,
        })
    }

    async fn request_audio(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SpeechError> {
        let mut url = format!("{}/speak?text={}", self.endpoint, urlencoding::encode(text));
        if let Some(voice) = voice {
            use std::fmt::Write;
            let _ = write!(url, "&voice={}", urlencoding::encode(voice));
        }

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SpeechError::Status {
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> SynthesisResult {
        if text.trim().is_empty() {
            return SynthesisResult::Failed;
        }
        if self.endpoint.is_empty() {
            debug!("No speech endpoint configured, using on-device voice");
            return SynthesisResult::FallbackText {
                script: text.to_string(),
            };
        }

        match self.request_audio(text, voice).await {
            Ok(bytes) if !bytes.is_empty() => {
                info!("Synthesized {} bytes of narration audio", bytes.len());
                SynthesisResult::Audio { bytes }
            }
            Ok(_) => {
                warn!("Speech service returned empty audio, falling back");
                SynthesisResult::FallbackText {
                    script: text.to_string(),
                }
            }
            Err(error) => {
                if error.is_quota_or_auth() {
                    warn!("Speech service quota/auth failure: {error}");
                } else {
                    warn!("Speech synthesis failed: {error}");
                }
                SynthesisResult::FallbackText {
                    script: text.to_string(),
                }
            }
        }
    }

    async fn synthesize_jingle(&self, text: &str) -> SynthesisResult {
        if text.trim().is_empty() {
            return SynthesisResult::Failed;
        }
        let hash = content_hash(text);

        if let Some(cache) = &self.cache {
            match cache.get(&hash).await {
                Ok(Some(bytes)) => {
                    debug!("Jingle cache hit for {hash}");
                    return SynthesisResult::Audio { bytes };
                }
                Ok(None) => {}
                Err(error) => warn!("Jingle cache lookup failed: {error}"),
            }
        }

        if self.endpoint.is_empty() {
            // A jingle has no spoken-text fallback worth hearing; the
            // sequence simply runs without it.
            return SynthesisResult::Failed;
        }

        match self.request_audio(text, None).await {
            Ok(bytes) if !bytes.is_empty() => {
                if let Some(cache) = &self.cache {
                    if let Err(error) = cache.store(&hash, &bytes).await {
                        warn!("Failed to cache jingle: {error}");
                    }
                }
                SynthesisResult::Audio { bytes }
            }
            Ok(_) => SynthesisResult::Failed,
            Err(error) => {
                warn!("Jingle synthesis failed: {error}");
                SynthesisResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn offline_synth(cache: Option<Arc<JingleCache>>) -> HttpSpeechSynthesizer {
        HttpSpeechSynthesizer::new("", None, cache).unwrap()
    }

    #[tokio::test]
    async fn test_unconfigured_endpoint_falls_back_to_text() {
        let synth = offline_synth(None).await;
        let result = synth.synthesize("Top story tonight", None).await;
        assert_eq!(
            result,
            SynthesisResult::FallbackText {
                script: "Top story tonight".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_text_is_failed() {
        let synth = offline_synth(None).await;
        assert_eq!(synth.synthesize("  ", None).await, SynthesisResult::Failed);
        assert_eq!(
            synth.synthesize_jingle("").await,
            SynthesisResult::Failed
        );
    }

    #[tokio::test]
    async fn test_jingle_served_from_cache_without_service() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(
            JingleCache::open(&dir.path().join("jingles.db"))
                .await
                .unwrap(),
        );
        cache
            .store(&content_hash("opening"), b"cached-jingle")
            .await
            .unwrap();

        let synth = offline_synth(Some(cache)).await;
        assert_eq!(
            synth.synthesize_jingle("opening").await,
            SynthesisResult::Audio {
                bytes: b"cached-jingle".to_vec()
            }
        );
        // Uncached jingles cannot be produced without the service.
        assert_eq!(
            synth.synthesize_jingle("closing").await,
            SynthesisResult::Failed
        );
    }
}
