//! HTTP client for the shared state store.
//!
//! The store exposes a tiny JSON surface:
//!
//! - `GET  {base}/records/station_state` returns the station record;
//! - `PATCH {base}/records/station_state` merges a partial update;
//! - `GET  {base}/revisions` returns a `{table: revision}` map that the
//!   poller diffs to synthesize change notices.

use crate::error::StoreError;
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use wavecast_core::{
    ChangeNotice, CoreError, StateStore, StationDelta, StationState, StoreTable,
};

/// Default timeout for HTTP requests (10 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Remote shared state store over HTTP JSON.
pub struct HttpStateStore {
    client: ClientWithMiddleware,
    base: String,
    api_key: Option<String>,
    notice_tx: broadcast::Sender<ChangeNotice>,
}

impl HttpStateStore {
    /// Build a client with the default timeout and retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(base: impl Into<String>, api_key: Option<String>) -> Result<Self, StoreError> {
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

        let (notice_tx, _) = broadcast::channel(128);
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
            api_key,
            notice_tx,
        })
    }

    fn record_url(&self) -> String {
        format!("{}/records/{}", self.base, StoreTable::StationState.as_str())
    }

    fn revisions_url(&self) -> String {
        format!("{}/revisions", self.base)
    }

    fn authorize(
        &self,
        request: reqwest_middleware::RequestBuilder,
    ) -> reqwest_middleware::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Fetch the per-table revision map.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unreachable or replies with a
    /// non-success status.
    pub async fn revisions(&self) -> Result<HashMap<String, i64>, StoreError> {
        let response = self
            .authorize(self.client.get(self.revisions_url()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
            });
        }
        response
            .json::<HashMap<String, i64>>()
            .await
            .map_err(|error| StoreError::Decode {
                reason: error.to_string(),
            })
    }

    /// Emit a change notice to local subscribers.
    pub(crate) fn notify(&self, notice: ChangeNotice) {
        let _ = self.notice_tx.send(notice);
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn read(&self) -> Result<StationState, CoreError> {
        let response = self
            .authorize(self.client.get(self.record_url()))
            .send()
            .await
            .map_err(StoreError::from)?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
            }
            .into());
        }
        let state = response
            .json::<StationState>()
            .await
            .map_err(|error| StoreError::Decode {
                reason: error.to_string(),
            })?;
        debug!(
            "Fetched station record: playing={}, tv={}, ts={}",
            state.is_playing, state.is_tv_active, state.timestamp
        );
        Ok(state)
    }

    async fn write(&self, delta: &StationDelta) -> Result<(), CoreError> {
        let body = serde_json::to_vec(delta).map_err(|error| StoreError::Encode {
            reason: error.to_string(),
        })?;
        let response = self
            .authorize(self.client.patch(self.record_url()))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(StoreError::from)?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
            }
            .into());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.notice_tx.subscribe()
    }
}

/// Diff two revision maps into change notices, newest first left in map
/// order. Unknown table names are ignored.
#[must_use]
pub fn diff_revisions(
    last: &HashMap<String, i64>,
    next: &HashMap<String, i64>,
) -> Vec<ChangeNotice> {
    let mut notices = Vec::new();
    for table in StoreTable::ALL {
        let name = table.as_str();
        let previous = last.get(name).copied();
        let current = next.get(name).copied();
        if let Some(revision) = current {
            if previous != Some(revision) {
                notices.push(ChangeNotice {
                    table,
                    timestamp: revision,
                });
            }
        }
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_detects_new_and_changed_tables() {
        let mut last = HashMap::new();
        last.insert("station_state".to_string(), 1_000_i64);
        last.insert("news_items".to_string(), 500_i64);

        let mut next = HashMap::new();
        next.insert("station_state".to_string(), 2_000_i64);
        next.insert("news_items".to_string(), 500_i64);
        next.insert("media_files".to_string(), 800_i64);

        let notices = diff_revisions(&last, &next);
        assert_eq!(notices.len(), 2);
        assert!(notices
            .iter()
            .any(|n| n.table == StoreTable::StationState && n.timestamp == 2_000));
        assert!(notices
            .iter()
            .any(|n| n.table == StoreTable::MediaFiles && n.timestamp == 800));
    }

    #[test]
    fn test_diff_first_poll_emits_everything_present() {
        let last = HashMap::new();
        let mut next = HashMap::new();
        next.insert("station_state".to_string(), 1_000_i64);

        let notices = diff_revisions(&last, &next);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].table, StoreTable::StationState);
    }

    #[test]
    fn test_diff_ignores_unknown_tables() {
        let last = HashMap::new();
        let mut next = HashMap::new();
        next.insert("surprises".to_string(), 1_000_i64);
        assert!(diff_revisions(&last, &next).is_empty());
    }
}
