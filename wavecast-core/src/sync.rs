//! Station sync hub: the last-applied shared state plus typed change
//! events.
//!
//! Every other component hangs off this hub. Remote snapshots enter
//! through [`StationSync::apply_snapshot`]; admin intents enter through
//! the `local_*` methods; both paths diff old against new state and
//! broadcast the difference as [`StationEvent`]s, so arbiters and players
//! react identically to local and remote causes.

use crate::session::{Role, SessionContext};
use crate::state::StationState;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Position jumps larger than this are reported as seeks rather than
/// ordinary progress.
const SEEK_EVENT_THRESHOLD_SECS: f64 = 2.0;

/// Events emitted by the sync hub.
#[derive(Debug, Clone)]
pub enum StationEvent {
    /// The audio asset changed.
    TrackChanged {
        id: Option<String>,
        url: Option<String>,
        name: String,
        offset: f64,
    },
    /// Playback started from silence (no previous track).
    PlaybackStarted { offset: f64 },
    PlaybackResumed { offset: f64 },
    PlaybackPaused { offset: f64 },
    PlaybackStopped,
    /// Regular offset refresh with no other change.
    OffsetSync { offset: f64, timestamp: i64 },
    /// The position jumped within the current track.
    SeekOccurred { offset: f64 },
    TvStarted {
        video_id: Option<String>,
        playlist: Vec<String>,
    },
    TvStopped,
    TvPlaylistChanged { playlist: Vec<String> },
    /// Local-only cue to bring up the video monitor, independent of
    /// whether video is being broadcast to listeners.
    MonitorStarted {
        video_id: Option<String>,
        playlist: Vec<String>,
    },
    /// The listener has never joined and the station is live; a user
    /// gesture is needed before audio may start.
    JoinPrompt,
    /// A second writer appears to be publishing the shared record.
    ConflictSuspected {
        writer_session: String,
        timestamp: i64,
    },
    /// Short-lived, human-readable status line.
    StatusMessage { text: String },
}

/// What [`StationSync::apply_snapshot`] did with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotDisposition {
    Applied,
    /// Not newer than the last applied snapshot; dropped.
    Stale,
    /// An admin session only seeds from remote on its first fetch, and
    /// only when nothing is locally active; afterwards local reality is
    /// authoritative and remote snapshots are ignored here.
    AdminLocalAuthority,
}

struct StationSyncInner {
    state: StationState,
    session: SessionContext,
}

/// Hub that holds station state and emits change events.
pub struct StationSync {
    inner: RwLock<StationSyncInner>,
    event_tx: broadcast::Sender<StationEvent>,
}

impl StationSync {
    #[must_use]
    pub fn new(session: SessionContext) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(128);
        Arc::new(Self {
            inner: RwLock::new(StationSyncInner {
                state: StationState::default(),
                session,
            }),
            event_tx,
        })
    }

    /// Subscribe to station events.
    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.event_tx.subscribe()
    }

    pub async fn state(&self) -> StationState {
        self.inner.read().await.state.clone()
    }

    pub async fn session(&self) -> SessionContext {
        self.inner.read().await.session.clone()
    }

    /// Apply a remote snapshot, returning what was done with it.
    pub async fn apply_snapshot(&self, snapshot: &StationState) -> SnapshotDisposition {
        let mut inner = self.inner.write().await;

        // Last-write-wins by embedded timestamp, not arrival order. A
        // duplicate or late notification loses here.
        if snapshot.timestamp <= inner.session.last_applied_timestamp {
            debug!(
                "Dropping stale snapshot: ts={} <= applied={}",
                snapshot.timestamp, inner.session.last_applied_timestamp
            );
            return SnapshotDisposition::Stale;
        }

        if inner.session.role == Role::Admin {
            if inner.session.bootstrapped {
                return SnapshotDisposition::AdminLocalAuthority;
            }
            inner.session.bootstrapped = true;
            let locally_active = inner.state.is_playing || inner.state.current_track_id.is_some();
            if locally_active {
                // A just-logged-in admin with a live deck must not be
                // silently overridden by whatever the record still says.
                info!("Admin already broadcasting; remote snapshot not applied");
                return SnapshotDisposition::AdminLocalAuthority;
            }
            info!("Admin bootstrap from remote state");
        }

        let old = inner.state.clone();
        self.emit_diff(&old, snapshot);

        if inner.session.role == Role::Listener
            && snapshot.is_playing
            && !inner.session.has_started_listening
            && !inner.session.join_prompt_shown
        {
            inner.session.join_prompt_shown = true;
            let _ = self.event_tx.send(StationEvent::JoinPrompt);
        }

        inner.session.last_applied_timestamp = snapshot.timestamp;
        inner.state = snapshot.clone();
        SnapshotDisposition::Applied
    }

    fn emit_diff(&self, old: &StationState, new: &StationState) {
        if old.track_changed(new) {
            let _ = self.event_tx.send(StationEvent::TrackChanged {
                id: new.current_track_id.clone(),
                url: new.current_track_url.clone(),
                name: new.current_track_name.clone(),
                offset: new.current_offset,
            });
            // Also surface the play flag so subscribers know whether the
            // new track is rolling or parked.
            let _ = self.event_tx.send(if new.is_playing {
                StationEvent::PlaybackResumed {
                    offset: new.current_offset,
                }
            } else {
                StationEvent::PlaybackPaused {
                    offset: new.current_offset,
                }
            });
        } else if old.play_toggled(new) {
            let event = if new.is_playing {
                if old.current_track_id.is_some() {
                    StationEvent::PlaybackResumed {
                        offset: new.current_offset,
                    }
                } else {
                    StationEvent::PlaybackStarted {
                        offset: new.current_offset,
                    }
                }
            } else if new.current_track_id.is_some() {
                StationEvent::PlaybackPaused {
                    offset: new.current_offset,
                }
            } else {
                StationEvent::PlaybackStopped
            };
            let _ = self.event_tx.send(event);
        } else if old.seek_occurred(new, SEEK_EVENT_THRESHOLD_SECS) {
            let _ = self.event_tx.send(StationEvent::SeekOccurred {
                offset: new.current_offset,
            });
        } else {
            let _ = self.event_tx.send(StationEvent::OffsetSync {
                offset: new.current_offset,
                timestamp: new.timestamp,
            });
        }

        if old.tv_toggled(new) {
            let _ = self.event_tx.send(if new.is_tv_active {
                StationEvent::TvStarted {
                    video_id: new.current_video_id.clone(),
                    playlist: new.tv_playlist.clone(),
                }
            } else {
                StationEvent::TvStopped
            });
        } else if new.is_tv_active && old.tv_feed_changed(new) {
            let _ = self.event_tx.send(StationEvent::TvPlaylistChanged {
                playlist: new.tv_playlist.clone(),
            });
        }
    }

    /// Record a locally-selected track (admin deck).
    pub async fn local_track_selected(
        &self,
        id: Option<String>,
        url: Option<String>,
        name: String,
        now_ms: i64,
    ) {
        let mut inner = self.inner.write().await;
        let old = inner.state.clone();
        inner.state.current_track_id = id;
        inner.state.current_track_url = url;
        inner.state.current_track_name = name;
        inner.state.current_offset = 0.0;
        inner.state.is_playing = true;
        inner.state.timestamp = now_ms;
        let new = inner.state.clone();
        self.emit_diff(&old, &new);
    }

    /// Record a local play/pause flip.
    pub async fn local_play_flag(&self, playing: bool, offset: f64, now_ms: i64) {
        let mut inner = self.inner.write().await;
        let old = inner.state.clone();
        inner.state.is_playing = playing;
        inner.state.current_offset = offset;
        inner.state.timestamp = now_ms;
        let new = inner.state.clone();
        self.emit_diff(&old, &new);
    }

    /// Refresh the local offset without emitting playback events; used by
    /// the heartbeat to keep the published position honest.
    pub async fn local_offset(&self, offset: f64, now_ms: i64) {
        let mut inner = self.inner.write().await;
        inner.state.current_offset = offset;
        inner.state.timestamp = now_ms;
    }

    /// Record a local video-channel change.
    pub async fn local_tv(
        &self,
        active: bool,
        video_id: Option<String>,
        playlist: Vec<String>,
        now_ms: i64,
    ) {
        let mut inner = self.inner.write().await;
        let old = inner.state.clone();
        inner.state.is_tv_active = active;
        inner.state.current_video_id = video_id;
        inner.state.tv_playlist = playlist;
        inner.state.timestamp = now_ms;
        let new = inner.state.clone();
        self.emit_diff(&old, &new);
    }

    /// The user interacted; autoplay restrictions are lifted.
    pub async fn mark_interacted(&self) {
        self.inner.write().await.session.has_interacted = true;
    }

    /// The listener explicitly joined the live broadcast.
    pub async fn mark_started_listening(&self) {
        let mut inner = self.inner.write().await;
        inner.session.has_interacted = true;
        inner.session.has_started_listening = true;
    }

    /// Mutate session flags under the lock.
    pub async fn update_session<F>(&self, mutate: F)
    where
        F: FnOnce(&mut SessionContext),
    {
        mutate(&mut self.inner.write().await.session);
    }

    /// Demote a losing admin to listener, resetting session lifecycle.
    pub async fn demote_to_listener(&self) {
        let mut inner = self.inner.write().await;
        warn!("Demoting session {} to listener", inner.session.session_id);
        inner.session.reset_for_role(Role::Listener);
        let _ = self.event_tx.send(StationEvent::StatusMessage {
            text: "Another admin took over the broadcast".to_string(),
        });
    }

    /// Cue the local video monitor. The admin's screen doubles as a
    /// monitor and always receives the feed, whatever the broadcast flag
    /// says.
    pub async fn announce_monitor(&self) {
        let state = self.state().await;
        let _ = self.event_tx.send(StationEvent::MonitorStarted {
            video_id: state.current_video_id,
            playlist: state.tv_playlist,
        });
    }

    /// Surface a suspected dual-writer situation.
    pub fn emit_conflict(&self, writer_session: String, timestamp: i64) {
        let _ = self.event_tx.send(StationEvent::ConflictSuspected {
            writer_session,
            timestamp,
        });
    }

    /// Surface a short human-readable status line.
    pub fn emit_status(&self, text: impl Into<String>) {
        let _ = self.event_tx.send(StationEvent::StatusMessage { text: text.into() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(timestamp: i64, offset: f64) -> StationState {
        StationState {
            is_playing: true,
            current_track_id: Some("t1".to_string()),
            current_track_name: "Track One".to_string(),
            current_offset: offset,
            timestamp,
            ..StationState::default()
        }
    }

    #[tokio::test]
    async fn test_stale_snapshot_rejected() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));

        let a = snapshot(1_000, 10.0);
        assert_eq!(sync.apply_snapshot(&a).await, SnapshotDisposition::Applied);

        // An older write arriving late must not override.
        let b = snapshot(900, 50.0);
        assert_eq!(sync.apply_snapshot(&b).await, SnapshotDisposition::Stale);

        let state = sync.state().await;
        assert!((state.current_offset - 10.0).abs() < f64::EPSILON);
        assert_eq!(state.timestamp, 1_000);
    }

    #[tokio::test]
    async fn test_duplicate_snapshot_rejected() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        let a = snapshot(1_000, 10.0);
        assert_eq!(sync.apply_snapshot(&a).await, SnapshotDisposition::Applied);
        assert_eq!(sync.apply_snapshot(&a).await, SnapshotDisposition::Stale);
    }

    #[tokio::test]
    async fn test_track_change_emits_events() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        let mut events = sync.subscribe();

        sync.apply_snapshot(&snapshot(1_000, 0.0)).await;

        assert!(matches!(
            events.recv().await,
            Ok(StationEvent::TrackChanged { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Ok(StationEvent::PlaybackResumed { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_prompt_once_for_fresh_listener() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        let mut events = sync.subscribe();

        sync.apply_snapshot(&snapshot(1_000, 0.0)).await;
        sync.apply_snapshot(&snapshot(3_000, 2.0)).await;

        let mut prompts = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StationEvent::JoinPrompt) {
                prompts += 1;
            }
        }
        assert_eq!(prompts, 1);
    }

    #[tokio::test]
    async fn test_no_join_prompt_after_listening_started() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        sync.mark_started_listening().await;
        let mut events = sync.subscribe();

        sync.apply_snapshot(&snapshot(1_000, 0.0)).await;

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, StationEvent::JoinPrompt));
        }
    }

    #[tokio::test]
    async fn test_admin_bootstraps_only_when_idle() {
        // Idle admin: first fetch seeds local state.
        let sync = StationSync::new(SessionContext::new(Role::Admin));
        assert_eq!(
            sync.apply_snapshot(&snapshot(1_000, 5.0)).await,
            SnapshotDisposition::Applied
        );
        // Later snapshots never override the admin.
        assert_eq!(
            sync.apply_snapshot(&snapshot(2_000, 9.0)).await,
            SnapshotDisposition::AdminLocalAuthority
        );
    }

    #[tokio::test]
    async fn test_admin_with_live_deck_not_overridden() {
        let sync = StationSync::new(SessionContext::new(Role::Admin));
        sync.local_track_selected(
            Some("local".to_string()),
            Some("https://cdn.example/local.mp3".to_string()),
            "Local Track".to_string(),
            500,
        )
        .await;

        assert_eq!(
            sync.apply_snapshot(&snapshot(1_000, 5.0)).await,
            SnapshotDisposition::AdminLocalAuthority
        );
        assert_eq!(sync.state().await.current_track_id.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn test_offset_sync_for_plain_heartbeat() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        sync.apply_snapshot(&snapshot(1_000, 0.0)).await;
        let mut events = sync.subscribe();

        // Two seconds later, two seconds further: plain progress.
        sync.apply_snapshot(&snapshot(3_000, 2.0)).await;

        assert!(matches!(
            events.recv().await,
            Ok(StationEvent::OffsetSync { .. })
        ));
    }

    #[tokio::test]
    async fn test_seek_event_on_position_jump() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        sync.apply_snapshot(&snapshot(1_000, 0.0)).await;
        let mut events = sync.subscribe();

        sync.apply_snapshot(&snapshot(2_000, 60.0)).await;

        assert!(matches!(
            events.recv().await,
            Ok(StationEvent::SeekOccurred { .. })
        ));
    }

    #[tokio::test]
    async fn test_tv_toggle_events() {
        let sync = StationSync::new(SessionContext::new(Role::Listener));
        let mut events = sync.subscribe();

        let mut on = snapshot(1_000, 0.0);
        on.is_playing = false;
        on.current_track_id = None;
        on.is_tv_active = true;
        on.current_video_id = Some("v1".to_string());
        sync.apply_snapshot(&on).await;

        let mut saw_tv_started = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StationEvent::TvStarted { .. }) {
                saw_tv_started = true;
            }
        }
        assert!(saw_tv_started);
    }
}
