//! Applies remote station state to local playback.
//!
//! The reconciler consumes store change notices, pushes each snapshot
//! through the sync hub (which handles staleness and role rules), and then
//! makes the local drivers match: resolve the track, correct the position
//! with latency compensation, follow the play and TV flags. A continuous
//! drift check and a stall watchdog run between snapshots, because the
//! snapshots alone are too sparse to keep a media element honest.

use crate::driver::PlaybackDriver;
use crate::drift::{DriftBasis, DriftCorrector, DriftThresholds, StallAction, StallWatchdog};
use crate::error::{PlaybackError, Result};
use crate::library::MediaLibrary;
use crate::state::StationState;
use crate::store::{StateStore, StoreTable};
use crate::sync::{SnapshotDisposition, StationSync};
use crate::time::epoch_ms;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconciler tuning.
///
/// The steady drift threshold doubles as the hysteresis band for snapshot
/// application: corrections inside it are skipped so normal network jitter
/// never causes an audible seek.
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// How often the drift check and stall watchdog run.
    pub drift_check_interval: Duration,
    pub thresholds: DriftThresholds,
    /// Consecutive frozen observations before the watchdog acts.
    pub stall_check_limit: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            drift_check_interval: Duration::from_secs(1),
            thresholds: DriftThresholds::default(),
            stall_check_limit: 2,
        }
    }
}

/// Keeps local playback following the shared record.
pub struct StateReconciler {
    sync: Arc<StationSync>,
    store: Arc<dyn StateStore>,
    audio: Arc<dyn PlaybackDriver>,
    video: Arc<dyn PlaybackDriver>,
    library: Arc<dyn MediaLibrary>,
    corrector: Mutex<DriftCorrector>,
    watchdog: Mutex<StallWatchdog>,
    pending_track_id: Mutex<Option<String>>,
    settings: ReconcilerSettings,
    cancel_token: CancellationToken,
}

impl StateReconciler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync: Arc<StationSync>,
        store: Arc<dyn StateStore>,
        audio: Arc<dyn PlaybackDriver>,
        video: Arc<dyn PlaybackDriver>,
        library: Arc<dyn MediaLibrary>,
        settings: ReconcilerSettings,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            sync,
            store,
            audio,
            video,
            library,
            corrector: Mutex::new(DriftCorrector::new(settings.thresholds)),
            watchdog: Mutex::new(StallWatchdog::new(settings.stall_check_limit)),
            pending_track_id: Mutex::new(None),
            settings,
            cancel_token,
        })
    }

    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!("State reconciler following the station record");

        // Late joiners bootstrap from whatever the record says right now.
        match self.store.read().await {
            Ok(snapshot) => self.handle_snapshot(snapshot, epoch_ms()).await,
            Err(error) => warn!("Initial state fetch failed: {error}"),
        }

        let mut notices = self.store.subscribe();
        let mut ticker = tokio::time::interval(self.settings.drift_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                notice = notices.recv() => match notice {
                    Ok(notice) => match notice.table {
                        StoreTable::StationState => match self.store.read().await {
                            Ok(snapshot) => {
                                self.handle_snapshot(snapshot, epoch_ms()).await;
                            }
                            // Keep the last applied state; an unreachable
                            // store means stale, not silent.
                            Err(error) => warn!("State fetch failed: {error}"),
                        },
                        StoreTable::MediaFiles => {
                            if let Err(error) = self.library.refresh().await {
                                warn!("Library refresh failed: {error}");
                            }
                            self.resolve_pending_track(epoch_ms()).await;
                        }
                        StoreTable::NewsItems | StoreTable::Messages => {}
                    },
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Missed {missed} notices; next snapshot resyncs");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => self.drift_tick(epoch_ms()).await,
            }
        }
    }

    /// Push one snapshot through the hub and, if it was applied, into the
    /// local drivers.
    pub async fn handle_snapshot(&self, snapshot: StationState, now_ms: i64) {
        match self.sync.apply_snapshot(&snapshot).await {
            SnapshotDisposition::Applied => {
                self.apply_audio(&snapshot, now_ms).await;
                self.apply_tv(&snapshot).await;
            }
            SnapshotDisposition::Stale | SnapshotDisposition::AdminLocalAuthority => {}
        }
    }

    /// The listener's explicit "join live broadcast" gesture.
    pub async fn join_broadcast(&self, now_ms: i64) {
        self.sync.mark_started_listening().await;
        // Joining is a first playable moment: correct with the tight
        // threshold so the newcomer lands on the broadcast clock.
        self.corrector.lock().await.mark_ready();
        let state = self.sync.state().await;
        self.apply_audio(&state, now_ms).await;
    }

    /// Re-apply the current state once the media library has loaded, so a
    /// track that was only known by id can start.
    pub async fn resolve_pending_track(&self, now_ms: i64) {
        let pending = self.pending_track_id.lock().await.clone();
        if pending.is_none() || !self.library.is_loaded().await {
            return;
        }
        debug!("Library loaded; resolving deferred track");
        let state = self.sync.state().await;
        self.apply_audio(&state, now_ms).await;
    }

    async fn resolve_source(&self, state: &StationState) -> Option<String> {
        if let Some(url) = &state.current_track_url {
            return Some(url.clone());
        }
        let id = state.current_track_id.as_ref()?;
        if !self.library.is_loaded().await {
            debug!("Library not loaded yet; deferring track {id}");
            *self.pending_track_id.lock().await = Some(id.clone());
            return None;
        }
        match self.library.resolve(id).await {
            Some(track) => {
                *self.pending_track_id.lock().await = None;
                track.url
            }
            None => {
                warn!("Track {id} not in local library");
                None
            }
        }
    }

    async fn apply_audio(&self, state: &StationState, now_ms: i64) {
        let mut freshly_loaded = false;
        if let Some(source) = self.resolve_source(state).await {
            if self.audio.current_source().await.as_deref() != Some(source.as_str()) {
                self.audio.load(&source).await;
                freshly_loaded = true;
            }
        }

        {
            let mut corrector = self.corrector.lock().await;
            corrector.set_basis(DriftBasis {
                offset: state.current_offset,
                timestamp: state.timestamp,
                playing: state.is_playing,
            });
            if freshly_loaded {
                // First playable moment: a precise join is worth a tight
                // threshold.
                corrector.mark_ready();
            }
        }

        let session = self.sync.session().await;
        let may_play = session.role.is_admin() || session.has_started_listening;

        if state.is_playing && may_play {
            match self.audio.play().await {
                Ok(()) => {}
                Err(PlaybackError::AutoplayBlocked) => {
                    self.sync.emit_status("Tap to join the live broadcast");
                }
                Err(error) => {
                    self.sync.emit_status(format!("Audio unavailable: {error}"));
                }
            }
        } else if !state.is_playing {
            self.audio.pause().await;
        }

        // Tight threshold right after a load, hysteresis band otherwise;
        // either way only a genuine desync is worth the audible glitch.
        let local = self.audio.position().await;
        let target = self.corrector.lock().await.evaluate(local, now_ms);
        if let Some(target) = target {
            self.audio.seek(target).await;
        }
    }

    async fn apply_tv(&self, state: &StationState) {
        if !state.is_tv_active {
            self.video.pause().await;
            return;
        }
        let source = state
            .current_video_id
            .clone()
            .or_else(|| state.tv_playlist.first().cloned());
        let Some(source) = source else {
            return;
        };
        if self.video.current_source().await.as_deref() != Some(source.as_str()) {
            self.video.load(&source).await;
        }
        match self.video.play().await {
            Ok(()) => {}
            Err(PlaybackError::AutoplayBlocked) => {
                self.sync.emit_status("Tap to watch the live video");
            }
            Err(error) => {
                // Video sources are one-off links, not a playlist; offer a
                // manual retry instead of advancing.
                self.sync
                    .emit_status(format!("Video unavailable ({error}), use reconnect"));
            }
        }
    }

    /// Manual recovery action for a failed video source.
    ///
    /// # Errors
    ///
    /// Propagates the playback error when the reload does not help.
    pub async fn reconnect_video(&self) -> Result<()> {
        if let Some(source) = self.video.current_source().await {
            info!("Reconnecting video source {source}");
            self.video.load(&source).await;
            self.video.play().await?;
        }
        Ok(())
    }

    /// One pass of the continuous drift check and stall watchdog.
    pub async fn drift_tick(&self, now_ms: i64) {
        let state = self.sync.state().await;
        let session = self.sync.session().await;
        let may_play = session.role.is_admin() || session.has_started_listening;
        let should_play = state.is_playing && may_play;

        let position = self.audio.position().await;

        if should_play {
            let target = self.corrector.lock().await.evaluate(position, now_ms);
            if let Some(target) = target {
                self.audio.seek(target).await;
            }
        }

        let action = self.watchdog.lock().await.check(should_play, position);
        match action {
            StallAction::None => {}
            StallAction::RetryPlay => {
                warn!("Playback stalled; retrying play");
                if let Err(error) = self.audio.play().await {
                    warn!("Stall retry failed: {error}");
                }
            }
            StallAction::ReloadSource => {
                warn!("Playback still stalled; reloading source");
                if let Some(source) = self.audio.current_source().await {
                    self.audio.load(&source).await;
                    let expected = self.corrector.lock().await.expected_position(now_ms);
                    if let Some(expected) = expected {
                        self.audio.seek(expected).await;
                    }
                    if let Err(error) = self.audio.play().await {
                        warn!("Reload retry failed: {error}");
                    }
                }
            }
        }
    }
}
