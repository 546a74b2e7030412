//! Admin-side state publishing.
//!
//! Two paths keep the shared record consistent with the admin's local
//! reality: an immediate fire-and-forget partial write on every local
//! change, and a fixed-interval heartbeat that republishes the complete
//! state. The heartbeat is the primary correction mechanism; a lost change
//! write heals on the next beat, and listeners who joined late bootstrap
//! from it.

use crate::driver::PlaybackDriver;
use crate::session::Role;
use crate::state::{StationDelta, StationState};
use crate::store::{StateStore, StoreTable};
use crate::sync::StationSync;
use crate::time::epoch_ms;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether a URL may be published for other clients to fetch. Purely local
/// references (blob handles, file paths) are withheld so listeners resolve
/// the asset by id instead of failing on an address only the admin can
/// open.
#[must_use]
pub fn publishable_url(candidate: &str) -> Option<&str> {
    match url::Url::parse(candidate) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(candidate),
        _ => None,
    }
}

fn strip_local_urls(delta: &mut StationDelta) {
    if let Some(track) = delta.track.as_mut() {
        track.url = track
            .url
            .as_deref()
            .and_then(publishable_url)
            .map(str::to_string);
    }
}

/// Publishes the admin's local state into the shared store.
pub struct StatePublisher {
    store: Arc<dyn StateStore>,
    sync: Arc<StationSync>,
    audio: Arc<dyn PlaybackDriver>,
    session_id: String,
    heartbeat: Duration,
    cancel_token: CancellationToken,
    last_write_ts: AtomicI64,
}

impl StatePublisher {
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        sync: Arc<StationSync>,
        audio: Arc<dyn PlaybackDriver>,
        session_id: String,
        heartbeat: Duration,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sync,
            audio,
            session_id,
            heartbeat,
            cancel_token,
            last_write_ts: AtomicI64::new(0),
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// One-time role-entry announcement: the admin's own screen becomes a
    /// monitor for the video feed, regardless of broadcast intent.
    pub async fn announce_admin(&self) {
        info!("Admin session {} on the desk", self.session_id);
        self.sync.announce_monitor().await;
    }

    /// Run the heartbeat and the dual-writer watch until cancelled.
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!("State publisher heartbeating every {:?}", self.heartbeat);
        let mut notices = self.store.subscribe();
        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("State publisher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.publish_heartbeat(epoch_ms()).await;
                }
                notice = notices.recv() => match notice {
                    Ok(notice) if notice.table == StoreTable::StationState => {
                        match self.store.read().await {
                            Ok(snapshot) => self.observe_remote(&snapshot).await,
                            Err(error) => debug!("Dual-writer check read failed: {error}"),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    /// Immediate write for a locally-initiated change. Fire-and-forget: a
    /// failure is logged and the next heartbeat restores consistency.
    pub async fn publish_change(&self, mut delta: StationDelta) {
        strip_local_urls(&mut delta);
        delta.writer_session = Some(self.session_id.clone());
        self.last_write_ts.store(delta.timestamp, Ordering::SeqCst);
        if let Err(error) = self.store.write(&delta).await {
            warn!("Change write failed (heartbeat will retry): {error}");
        }
    }

    /// Republish the complete current local state.
    pub async fn publish_heartbeat(&self, now_ms: i64) {
        let session = self.sync.session().await;
        if session.role != Role::Admin {
            return;
        }

        // Keep the published offset honest: read the deck position now.
        let position = self.audio.position().await;
        self.sync.local_offset(position, now_ms).await;

        let state = self.sync.state().await;
        let mut delta = StationDelta::full(&state, now_ms, &self.session_id);
        strip_local_urls(&mut delta);

        self.last_write_ts.store(now_ms, Ordering::SeqCst);
        if let Err(error) = self.store.write(&delta).await {
            warn!("Heartbeat write failed: {error}");
        }
    }

    /// Dual-writer detection. A snapshot stamped by a foreign session,
    /// newer than our own last write, while we hold the admin role, means
    /// two publishers are live. Policy: the lowest session id keeps the
    /// role; the loser stops publishing and demotes to listener.
    pub async fn observe_remote(&self, snapshot: &StationState) {
        let session = self.sync.session().await;
        if session.role != Role::Admin {
            return;
        }
        let writer = match &snapshot.writer_session {
            Some(writer) if *writer != self.session_id => writer.clone(),
            _ => return,
        };
        if snapshot.timestamp <= self.last_write_ts.load(Ordering::SeqCst) {
            return;
        }

        warn!(
            "Another admin appears active: session {} wrote at {}",
            writer, snapshot.timestamp
        );
        self.sync.emit_conflict(writer.clone(), snapshot.timestamp);

        if writer.as_str() < self.session_id.as_str() {
            self.sync.demote_to_listener().await;
            self.cancel_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ClockDriver, MediaChannel};
    use crate::session::SessionContext;
    use crate::store::MemoryStore;

    fn foreign_write(writer: &str, timestamp: i64) -> StationState {
        StationState {
            writer_session: Some(writer.to_string()),
            timestamp,
            ..StationState::default()
        }
    }

    fn publisher_rig(session_id: &str) -> (Arc<StatePublisher>, Arc<MemoryStore>, Arc<StationSync>) {
        let store = MemoryStore::new();
        let sync = StationSync::new(SessionContext::with_id(
            Role::Admin,
            session_id.to_string(),
        ));
        let audio = ClockDriver::new(MediaChannel::Audio);
        let publisher = StatePublisher::new(
            store.clone(),
            sync.clone(),
            audio,
            session_id.to_string(),
            Duration::from_secs(2),
            CancellationToken::new(),
        );
        (publisher, store, sync)
    }

    #[test]
    fn test_publishable_url_policy() {
        assert!(publishable_url("https://cdn.example/t1.mp3").is_some());
        assert!(publishable_url("http://cdn.example/t1.mp3").is_some());
        assert!(publishable_url("blob:web/3c1f-42").is_none());
        assert!(publishable_url("file:///home/dj/t1.mp3").is_none());
        assert!(publishable_url("not a url").is_none());
    }

    #[tokio::test]
    async fn test_change_write_is_stamped_and_stored() {
        let (publisher, store, _sync) = publisher_rig("admin-a");

        publisher
            .publish_change(StationDelta::stamped(1_000, "admin-a").with_playing(true))
            .await;

        let state = store.read().await.unwrap();
        assert!(state.is_playing);
        assert_eq!(state.writer_session.as_deref(), Some("admin-a"));
        assert_eq!(state.timestamp, 1_000);
    }

    #[tokio::test]
    async fn test_heartbeat_republishes_full_state() {
        let (publisher, store, sync) = publisher_rig("admin-a");
        sync.local_track_selected(
            Some("t1".to_string()),
            Some("https://cdn.example/t1.mp3".to_string()),
            "Track One".to_string(),
            500,
        )
        .await;

        publisher.publish_heartbeat(2_000).await;

        let state = store.read().await.unwrap();
        assert!(state.is_playing);
        assert_eq!(state.current_track_id.as_deref(), Some("t1"));
        assert_eq!(
            state.current_track_url.as_deref(),
            Some("https://cdn.example/t1.mp3")
        );
        assert_eq!(state.timestamp, 2_000);
    }

    #[tokio::test]
    async fn test_heartbeat_withholds_local_urls() {
        let (publisher, store, sync) = publisher_rig("admin-a");
        sync.local_track_selected(
            Some("t1".to_string()),
            Some("blob:web/3c1f-42".to_string()),
            "Track One".to_string(),
            500,
        )
        .await;

        publisher.publish_heartbeat(2_000).await;

        let state = store.read().await.unwrap();
        // The id travels; the unreachable URL does not.
        assert_eq!(state.current_track_id.as_deref(), Some("t1"));
        assert!(state.current_track_url.is_none());
    }

    #[tokio::test]
    async fn test_listener_session_never_heartbeats() {
        let store = MemoryStore::new();
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        let audio = ClockDriver::new(MediaChannel::Audio);
        let publisher = StatePublisher::new(
            store.clone(),
            sync,
            audio,
            "listener-1".to_string(),
            Duration::from_secs(2),
            CancellationToken::new(),
        );

        publisher.publish_heartbeat(2_000).await;

        assert_eq!(store.read().await.unwrap().timestamp, 0);
    }

    #[tokio::test]
    async fn test_conflict_lower_id_wins_we_demote() {
        let (publisher, _store, sync) = publisher_rig("admin-b");
        publisher.publish_heartbeat(1_000).await;

        publisher
            .observe_remote(&foreign_write("admin-a", 5_000))
            .await;

        assert_eq!(sync.session().await.role, Role::Listener);
        assert!(publisher.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_conflict_higher_id_we_keep_role() {
        let (publisher, _store, sync) = publisher_rig("admin-b");
        publisher.publish_heartbeat(1_000).await;

        publisher
            .observe_remote(&foreign_write("admin-c", 5_000))
            .await;

        assert_eq!(sync.session().await.role, Role::Admin);
        assert!(!publisher.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_own_echo_is_not_a_conflict() {
        let (publisher, _store, sync) = publisher_rig("admin-b");
        publisher.publish_heartbeat(1_000).await;

        publisher
            .observe_remote(&foreign_write("admin-b", 5_000))
            .await;

        assert_eq!(sync.session().await.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_old_foreign_write_is_not_a_conflict() {
        let (publisher, _store, sync) = publisher_rig("admin-b");
        publisher.publish_heartbeat(10_000).await;

        publisher
            .observe_remote(&foreign_write("admin-a", 5_000))
            .await;

        assert_eq!(sync.session().await.role, Role::Admin);
    }
}
