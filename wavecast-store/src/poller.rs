//! Change-notification polling.
//!
//! The store has no push channel of its own; this poller turns the
//! revision map into at-least-once change notices. Consumers already
//! tolerate duplicates and reordering by timestamp, so delivering a
//! notice twice is harmless and delivering late only delays convergence
//! until the next poll.

use crate::client::{diff_revisions, HttpStateStore};
use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wavecast_core::DurationExt;

/// Polls the store's revision map and emits change notices.
pub struct StorePoller {
    store: Arc<HttpStateStore>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
    last_revisions: Mutex<HashMap<String, i64>>,
}

impl StorePoller {
    #[must_use]
    pub fn new(
        store: Arc<HttpStateStore>,
        poll_interval_ms: u64,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            poll_interval: Duration::from_millis(poll_interval_ms),
            cancel_token,
            last_revisions: Mutex::new(HashMap::new()),
        })
    }

    /// Start polling in a background task.
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            "Store poller watching revisions every {:?}",
            self.poll_interval
        );

        let mut consecutive_errors: u32 = 0;
        let max_backoff = Duration::from_secs(30);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Store poller shutting down");
                    break;
                }
                () = tokio::time::sleep(self.poll_interval) => {
                    match self.poll_once().await {
                        Ok(()) => {
                            consecutive_errors = 0;
                        }
                        Err(error) => {
                            consecutive_errors += 1;
                            warn!("Revision poll failed ({consecutive_errors} in a row): {error}");

                            // Back off exponentially from 100ms, capped at 30s.
                            let backoff_ms = 100_u64
                                .saturating_mul(2_u64.saturating_pow(consecutive_errors.min(10)));
                            let backoff =
                                Duration::from_millis(backoff_ms.min(max_backoff.as_millis_u64()));

                            if consecutive_errors >= 5 {
                                error!(
                                    "Store unreachable, next attempt in {}s",
                                    backoff.as_secs()
                                );
                            }

                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), StoreError> {
        let next = self.store.revisions().await?;
        let mut last = self.last_revisions.lock().await;
        for notice in diff_revisions(&last, &next) {
            self.store.notify(notice);
        }
        *last = next;
        Ok(())
    }
}
