//! Admin-side channel consoles.
//!
//! These translate deck intents (play this track, toggle, go live on
//! video) into driver calls, local state updates, and published deltas.
//! The audio console also owns auto-advance: when a clip ends or its
//! source cannot be decoded, the station moves on to a different track by
//! itself instead of falling silent.

use crate::driver::{next_track_index, AdvancePolicy, DriverEvent, PlaybackDriver};
use crate::error::{CoreError, PlaybackError, Result};
use crate::library::{MediaLibrary, TrackRef};
use crate::publisher::StatePublisher;
use crate::state::{StationDelta, TrackSelection, TvSelection};
use crate::sync::StationSync;
use crate::time::epoch_ms;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The admin's audio deck.
pub struct RadioChannel {
    driver: Arc<dyn PlaybackDriver>,
    library: Arc<dyn MediaLibrary>,
    sync: Arc<StationSync>,
    publisher: Option<Arc<StatePublisher>>,
    policy: AdvancePolicy,
    current_index: Mutex<Option<usize>>,
    cancel_token: CancellationToken,
}

impl RadioChannel {
    #[must_use]
    pub fn new(
        driver: Arc<dyn PlaybackDriver>,
        library: Arc<dyn MediaLibrary>,
        sync: Arc<StationSync>,
        publisher: Option<Arc<StatePublisher>>,
        policy: AdvancePolicy,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            library,
            sync,
            publisher,
            policy,
            current_index: Mutex::new(None),
            cancel_token,
        })
    }

    /// Watch the driver for ended/error events and auto-advance.
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = self.driver.subscribe();
            loop {
                tokio::select! {
                    () = self.cancel_token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => self.handle_driver_event(&event).await,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Handle one driver lifecycle event.
    pub async fn handle_driver_event(&self, event: &DriverEvent) {
        match event {
            DriverEvent::Ended => {
                info!("Track ended, advancing");
                if let Err(error) = self.advance().await {
                    warn!("Auto-advance failed: {error}");
                }
            }
            DriverEvent::Error { message } => {
                self.sync.emit_status(format!("Skipping track: {message}"));
                if let Err(error) = self.advance().await {
                    warn!("Auto-advance after error failed: {error}");
                }
            }
            DriverEvent::Ready { .. } | DriverEvent::Stalled => {}
        }
    }

    /// Play the playlist entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error when the index is out of range or every candidate
    /// source fails to play.
    pub async fn play_index(&self, index: usize) -> Result<()> {
        let tracks = self.library.tracks().await;
        // One attempt per playlist entry; a playlist of all-bad files ends
        // in an error instead of a spin.
        let mut attempts = 0;
        let mut index = index;
        loop {
            let track = tracks
                .get(index)
                .ok_or_else(|| CoreError::UnknownTrack {
                    track_id: format!("#{index}"),
                })?
                .clone();
            match self.try_play_track(index, &track).await {
                Ok(()) => return Ok(()),
                Err(CoreError::Playback(PlaybackError::Decode { .. } | PlaybackError::Network { .. })) => {
                    attempts += 1;
                    if attempts >= tracks.len() {
                        return Err(CoreError::Playback(PlaybackError::Decode {
                            source_url: track.url.unwrap_or_default(),
                        }));
                    }
                    self.sync
                        .emit_status(format!("Skipping {}: cannot play", track.name));
                    match next_track_index(tracks.len(), Some(index), self.policy) {
                        Some(next) => index = next,
                        None => return Err(CoreError::Playback(PlaybackError::NoSource)),
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn try_play_track(&self, index: usize, track: &TrackRef) -> Result<()> {
        let url = track
            .url
            .clone()
            .ok_or_else(|| CoreError::UnknownTrack {
                track_id: track.id.clone(),
            })?;

        self.driver.load(&url).await;
        self.driver.play().await?;
        *self.current_index.lock().await = Some(index);

        let now = epoch_ms();
        self.sync
            .local_track_selected(
                Some(track.id.clone()),
                Some(url.clone()),
                track.name.clone(),
                now,
            )
            .await;
        if let Some(publisher) = &self.publisher {
            publisher
                .publish_change(
                    StationDelta::stamped(now, publisher.session_id())
                        .with_playing(true)
                        .with_offset(0.0)
                        .with_track(TrackSelection {
                            id: Some(track.id.clone()),
                            url: Some(url),
                            name: track.name.clone(),
                        }),
                )
                .await;
        }
        info!("Now playing: {}", track.name);
        Ok(())
    }

    /// Move to a different track. Never re-picks the current index when
    /// more than one track exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the library is empty or nothing can play.
    pub async fn advance(&self) -> Result<()> {
        let tracks = self.library.tracks().await;
        let current = *self.current_index.lock().await;
        match next_track_index(tracks.len(), current, self.policy) {
            Some(next) => self.play_index(next).await,
            None => Err(CoreError::Playback(PlaybackError::NoSource)),
        }
    }

    /// Flip play/pause on the deck.
    ///
    /// # Errors
    ///
    /// Propagates playback errors from the resume path.
    pub async fn toggle_play(&self) -> Result<()> {
        let now = epoch_ms();
        if self.driver.is_playing().await {
            self.driver.pause().await;
            let position = self.driver.position().await;
            self.sync.local_play_flag(false, position, now).await;
            if let Some(publisher) = &self.publisher {
                publisher
                    .publish_change(
                        StationDelta::stamped(now, publisher.session_id())
                            .with_playing(false)
                            .with_offset(position),
                    )
                    .await;
            }
        } else {
            self.driver.play().await?;
            let position = self.driver.position().await;
            self.sync.local_play_flag(true, position, now).await;
            if let Some(publisher) = &self.publisher {
                publisher
                    .publish_change(
                        StationDelta::stamped(now, publisher.session_id())
                            .with_playing(true)
                            .with_offset(position),
                    )
                    .await;
            }
        }
        Ok(())
    }
}

/// The admin's video desk.
pub struct TvChannel {
    driver: Arc<dyn PlaybackDriver>,
    sync: Arc<StationSync>,
    publisher: Option<Arc<StatePublisher>>,
}

impl TvChannel {
    #[must_use]
    pub fn new(
        driver: Arc<dyn PlaybackDriver>,
        sync: Arc<StationSync>,
        publisher: Option<Arc<StatePublisher>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            sync,
            publisher,
        })
    }

    /// Put a video feed on the air.
    ///
    /// # Errors
    ///
    /// Propagates playback errors; the caller offers a manual reconnect.
    pub async fn go_live(&self, video_id: Option<String>, playlist: Vec<String>) -> Result<()> {
        let source = video_id
            .clone()
            .or_else(|| playlist.first().cloned())
            .ok_or(CoreError::Playback(PlaybackError::NoSource))?;

        self.driver.load(&source).await;
        self.driver.play().await?;

        let now = epoch_ms();
        self.sync
            .local_tv(true, video_id.clone(), playlist.clone(), now)
            .await;
        if let Some(publisher) = &self.publisher {
            publisher
                .publish_change(
                    StationDelta::stamped(now, publisher.session_id())
                        .with_tv_active(true)
                        .with_tv(TvSelection { video_id, playlist }),
                )
                .await;
        }
        info!("TV channel live");
        Ok(())
    }

    /// Take the video feed off the air.
    pub async fn stop_live(&self) {
        self.driver.pause().await;
        let now = epoch_ms();
        let state = self.sync.state().await;
        self.sync
            .local_tv(false, state.current_video_id.clone(), state.tv_playlist.clone(), now)
            .await;
        if let Some(publisher) = &self.publisher {
            publisher
                .publish_change(
                    StationDelta::stamped(now, publisher.session_id()).with_tv_active(false),
                )
                .await;
        }
        info!("TV channel off air");
    }

    /// Manual recovery for a one-off video link that failed.
    ///
    /// # Errors
    ///
    /// Propagates the playback error when the reload does not help.
    pub async fn reconnect(&self) -> Result<()> {
        if let Some(source) = self.driver.current_source().await {
            info!("Reconnecting video source {source}");
            self.driver.load(&source).await;
            self.driver.play().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ClockDriver, MediaChannel};
    use crate::library::MemoryLibrary;
    use crate::session::{Role, SessionContext};
    use crate::store::{MemoryStore, StateStore};
    use std::time::Duration;

    fn three_track_library() -> Arc<MemoryLibrary> {
        MemoryLibrary::with_tracks(
            (1..=3)
                .map(|n| TrackRef {
                    id: format!("t{n}"),
                    name: format!("Track {n}"),
                    url: Some(format!("https://cdn.example/t{n}.mp3")),
                })
                .collect(),
        )
    }

    struct Rig {
        radio: Arc<RadioChannel>,
        driver: Arc<ClockDriver>,
        sync: Arc<StationSync>,
        store: Arc<MemoryStore>,
    }

    fn radio_rig(policy: AdvancePolicy) -> Rig {
        let driver = ClockDriver::new(MediaChannel::Audio);
        let library = three_track_library();
        let sync = StationSync::new(SessionContext::with_id(Role::Admin, "admin-a".to_string()));
        let store = MemoryStore::new();
        let publisher = StatePublisher::new(
            store.clone(),
            sync.clone(),
            driver.clone(),
            "admin-a".to_string(),
            Duration::from_secs(2),
            CancellationToken::new(),
        );
        let radio = RadioChannel::new(
            driver.clone(),
            library,
            sync.clone(),
            Some(publisher),
            policy,
            CancellationToken::new(),
        );
        Rig {
            radio,
            driver,
            sync,
            store,
        }
    }

    #[tokio::test]
    async fn test_play_index_publishes_track() {
        let rig = radio_rig(AdvancePolicy::Sequential);
        rig.radio.play_index(0).await.unwrap();

        assert!(rig.driver.is_playing().await);
        let state = rig.store.read().await.unwrap();
        assert_eq!(state.current_track_id.as_deref(), Some("t1"));
        assert!(state.is_playing);
        assert_eq!(state.writer_session.as_deref(), Some("admin-a"));
    }

    #[tokio::test]
    async fn test_decode_failure_auto_skips_to_different_track() {
        let rig = radio_rig(AdvancePolicy::Shuffle);
        // Track 2's source is undecodable.
        rig.driver.fail_source("https://cdn.example/t2.mp3").await;

        rig.radio.play_index(1).await.unwrap();

        // A different track is playing, without user action.
        assert!(rig.driver.is_playing().await);
        let source = rig.driver.current_source().await.unwrap();
        assert_ne!(source, "https://cdn.example/t2.mp3");
        let state = rig.sync.state().await;
        assert_ne!(state.current_track_id.as_deref(), Some("t2"));
        assert!(state.is_playing);
    }

    #[tokio::test]
    async fn test_all_sources_bad_errors_out() {
        let rig = radio_rig(AdvancePolicy::Sequential);
        for n in 1..=3 {
            rig.driver
                .fail_source(&format!("https://cdn.example/t{n}.mp3"))
                .await;
        }
        assert!(rig.radio.play_index(0).await.is_err());
    }

    #[tokio::test]
    async fn test_ended_event_advances_sequentially() {
        let rig = radio_rig(AdvancePolicy::Sequential);
        rig.radio.play_index(0).await.unwrap();

        rig.radio.handle_driver_event(&DriverEvent::Ended).await;

        assert_eq!(
            rig.driver.current_source().await.as_deref(),
            Some("https://cdn.example/t2.mp3")
        );
        assert_eq!(
            rig.sync.state().await.current_track_id.as_deref(),
            Some("t2")
        );
    }

    #[tokio::test]
    async fn test_toggle_play_round_trip() {
        let rig = radio_rig(AdvancePolicy::Sequential);
        rig.radio.play_index(0).await.unwrap();

        rig.radio.toggle_play().await.unwrap();
        assert!(!rig.driver.is_playing().await);
        assert!(!rig.store.read().await.unwrap().is_playing);

        rig.radio.toggle_play().await.unwrap();
        assert!(rig.driver.is_playing().await);
        assert!(rig.store.read().await.unwrap().is_playing);
    }

    #[tokio::test]
    async fn test_tv_go_live_and_stop() {
        let driver = ClockDriver::new(MediaChannel::Video);
        let sync = StationSync::new(SessionContext::with_id(Role::Admin, "admin-a".to_string()));
        let store = MemoryStore::new();
        let audio = ClockDriver::new(MediaChannel::Audio);
        let publisher = StatePublisher::new(
            store.clone(),
            sync.clone(),
            audio,
            "admin-a".to_string(),
            Duration::from_secs(2),
            CancellationToken::new(),
        );
        let tv = TvChannel::new(driver.clone(), sync, Some(publisher));

        tv.go_live(Some("https://video.example/live".to_string()), Vec::new())
            .await
            .unwrap();
        assert!(driver.is_playing().await);
        assert!(store.read().await.unwrap().is_tv_active);

        tv.stop_live().await;
        assert!(!driver.is_playing().await);
        assert!(!store.read().await.unwrap().is_tv_active);
    }
}
