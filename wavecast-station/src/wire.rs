//! News-wire script source.
//!
//! Script composition is an external capability; this client just asks
//! the wire service for the current script of a bulletin kind.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use wavecast_core::{CoreError, EngineKind, Result, ScriptSource};

pub struct WireScriptSource {
    client: reqwest::Client,
    endpoint: String,
    kind: EngineKind,
}

impl WireScriptSource {
    #[must_use]
    pub fn new(endpoint: &str, kind: EngineKind) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            kind,
        }
    }
}

#[async_trait]
impl ScriptSource for WireScriptSource {
    fn name(&self) -> &'static str {
        "news-wire"
    }

    async fn compose(&self) -> Result<String> {
        if self.endpoint.is_empty() {
            return Err(CoreError::ScriptUnavailable {
                wire: self.name().to_string(),
                reason: "no wire endpoint configured".to_string(),
            });
        }
        let url = format!("{}/news/{}/script", self.endpoint, self.kind);
        debug!("Fetching bulletin script: {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| CoreError::ScriptUnavailable {
                wire: "news-wire".to_string(),
                reason: error.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(CoreError::ScriptUnavailable {
                wire: self.name().to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        let script = response
            .text()
            .await
            .map_err(|error| CoreError::ScriptUnavailable {
                wire: "news-wire".to_string(),
                reason: error.to_string(),
            })?;
        if script.trim().is_empty() {
            return Err(CoreError::ScriptUnavailable {
                wire: self.name().to_string(),
                reason: "empty script".to_string(),
            });
        }
        Ok(script)
    }
}
