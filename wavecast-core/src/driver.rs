//! Playback driver: a thin wrapper around one media channel.
//!
//! Each client owns exactly two driver instances, one audio and one video;
//! nothing outside the arbiters may call play/pause/seek on them
//! concurrently. The ducking gain path is separate from the user volume so
//! narration can force the output to exact silence and hand back the
//! user's chosen level untouched.

use crate::error::PlaybackError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaChannel {
    Audio,
    Video,
}

/// Lifecycle events of the underlying media element.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A source finished loading and is seekable.
    Ready { source: String },
    /// The current clip played to completion.
    Ended,
    /// Playback should be progressing but is not.
    Stalled,
    /// Decode or network failure for the current source.
    Error { message: String },
}

#[async_trait]
pub trait PlaybackDriver: Send + Sync {
    fn channel(&self) -> MediaChannel;

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;

    /// Swap the media source, resetting position and pausing. Emits
    /// `Ready` once the new source is seekable.
    async fn load(&self, source: &str);

    async fn current_source(&self) -> Option<String>;

    /// Start playback.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::AutoplayBlocked`] when the environment refuses to
    /// start without a user gesture; [`PlaybackError::Decode`] or
    /// [`PlaybackError::Network`] for a bad source;
    /// [`PlaybackError::NoSource`] when nothing is loaded.
    async fn play(&self) -> std::result::Result<(), PlaybackError>;

    async fn pause(&self);

    async fn seek(&self, position_secs: f64);

    /// Current playback position in seconds. Implementations also use the
    /// call to advance bookkeeping, emitting `Ended` when the clip runs
    /// out.
    async fn position(&self) -> f64;

    async fn duration(&self) -> Option<f64>;

    async fn is_playing(&self) -> bool;

    /// User-facing volume slider value, 0.0 to 1.0.
    async fn set_volume(&self, volume: f32);

    async fn volume(&self) -> f32;

    /// Ducking gain path, independent of the user volume. The audible
    /// level is `volume * gain`, or zero while muted.
    async fn set_gain(&self, gain: f32);

    async fn gain(&self) -> f32;

    async fn set_muted(&self, muted: bool);

    async fn is_muted(&self) -> bool;

    /// The level actually reaching the output right now.
    async fn effective_level(&self) -> f32;
}

struct ClockInner {
    source: Option<String>,
    playing: bool,
    base_position: f64,
    basis: Instant,
    duration: Option<f64>,
    volume: f32,
    gain: f32,
    muted: bool,
    autoplay_blocked: bool,
    failing_sources: HashSet<String>,
    source_durations: HashMap<String, f64>,
}

impl ClockInner {
    fn raw_position(&self) -> f64 {
        if self.playing {
            self.base_position + self.basis.elapsed().as_secs_f64()
        } else {
            self.base_position
        }
    }
}

/// Reference driver backed by a wall-clock position model.
///
/// The position advances with elapsed time while playing, exactly like a
/// media element that decodes in real time. Failure modes (bad sources,
/// autoplay policy) are scriptable so recovery paths can be exercised
/// without real media.
pub struct ClockDriver {
    channel: MediaChannel,
    inner: Mutex<ClockInner>,
    event_tx: broadcast::Sender<DriverEvent>,
}

impl ClockDriver {
    #[must_use]
    pub fn new(channel: MediaChannel) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            channel,
            inner: Mutex::new(ClockInner {
                source: None,
                playing: false,
                base_position: 0.0,
                basis: Instant::now(),
                duration: None,
                volume: 1.0,
                gain: 1.0,
                muted: false,
                autoplay_blocked: false,
                failing_sources: HashSet::new(),
                source_durations: HashMap::new(),
            }),
            event_tx,
        })
    }

    /// Simulate the environment's autoplay policy: while set, `play()`
    /// fails until a user gesture clears it.
    pub async fn set_autoplay_blocked(&self, blocked: bool) {
        self.inner.lock().await.autoplay_blocked = blocked;
    }

    /// Script a decode failure for a source.
    pub async fn fail_source(&self, source: &str) {
        self.inner
            .lock()
            .await
            .failing_sources
            .insert(source.to_string());
    }

    /// Script the clip length reported for a source.
    pub async fn set_source_duration(&self, source: &str, secs: f64) {
        self.inner
            .lock()
            .await
            .source_durations
            .insert(source.to_string(), secs);
    }
}

#[async_trait]
impl PlaybackDriver for ClockDriver {
    fn channel(&self) -> MediaChannel {
        self.channel
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.event_tx.subscribe()
    }

    async fn load(&self, source: &str) {
        let mut inner = self.inner.lock().await;
        inner.source = Some(source.to_string());
        inner.playing = false;
        inner.base_position = 0.0;
        inner.basis = Instant::now();
        inner.duration = inner.source_durations.get(source).copied();
        debug!("{:?} driver loaded {}", self.channel, source);
        let _ = self.event_tx.send(DriverEvent::Ready {
            source: source.to_string(),
        });
    }

    async fn current_source(&self) -> Option<String> {
        self.inner.lock().await.source.clone()
    }

    async fn play(&self) -> std::result::Result<(), PlaybackError> {
        let mut inner = self.inner.lock().await;
        let source = match inner.source.clone() {
            Some(source) => source,
            None => return Err(PlaybackError::NoSource),
        };
        if inner.failing_sources.contains(&source) {
            // The caller gets the error from the returned result; the
            // Error event is reserved for failures with no caller, like a
            // mid-play decode fault.
            return Err(PlaybackError::Decode { source_url: source });
        }
        if inner.autoplay_blocked {
            return Err(PlaybackError::AutoplayBlocked);
        }
        if !inner.playing {
            inner.basis = Instant::now();
            inner.playing = true;
        }
        Ok(())
    }

    async fn pause(&self) {
        let mut inner = self.inner.lock().await;
        inner.base_position = inner.raw_position();
        inner.playing = false;
    }

    async fn seek(&self, position_secs: f64) {
        let mut inner = self.inner.lock().await;
        let clamped = match inner.duration {
            Some(duration) => position_secs.clamp(0.0, duration),
            None => position_secs.max(0.0),
        };
        inner.base_position = clamped;
        inner.basis = Instant::now();
    }

    async fn position(&self) -> f64 {
        let mut inner = self.inner.lock().await;
        let position = inner.raw_position();
        if let Some(duration) = inner.duration {
            if inner.playing && position >= duration {
                inner.base_position = duration;
                inner.playing = false;
                let _ = self.event_tx.send(DriverEvent::Ended);
                return duration;
            }
        }
        position
    }

    async fn duration(&self) -> Option<f64> {
        self.inner.lock().await.duration
    }

    async fn is_playing(&self) -> bool {
        self.inner.lock().await.playing
    }

    async fn set_volume(&self, volume: f32) {
        self.inner.lock().await.volume = volume.clamp(0.0, 1.0);
    }

    async fn volume(&self) -> f32 {
        self.inner.lock().await.volume
    }

    async fn set_gain(&self, gain: f32) {
        self.inner.lock().await.gain = gain.clamp(0.0, 1.0);
    }

    async fn gain(&self) -> f32 {
        self.inner.lock().await.gain
    }

    async fn set_muted(&self, muted: bool) {
        self.inner.lock().await.muted = muted;
    }

    async fn is_muted(&self) -> bool {
        self.inner.lock().await.muted
    }

    async fn effective_level(&self) -> f32 {
        let inner = self.inner.lock().await;
        if inner.muted {
            0.0
        } else {
            inner.volume * inner.gain
        }
    }
}

/// How the audio channel moves on when a clip ends or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePolicy {
    Sequential,
    Shuffle,
}

/// Pick the next playlist index. Never repeats `current` when more than
/// one item exists, so a bad or finished clip cannot loop onto itself.
#[must_use]
pub fn next_track_index(len: usize, current: Option<usize>, policy: AdvancePolicy) -> Option<usize> {
    if len == 0 {
        return None;
    }
    if len == 1 {
        return Some(0);
    }
    match policy {
        AdvancePolicy::Sequential => Some(current.map_or(0, |index| (index + 1) % len)),
        AdvancePolicy::Shuffle => {
            let mut index = fastrand::usize(..len);
            while Some(index) == current {
                index = fastrand::usize(..len);
            }
            Some(index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_position_advances_only_while_playing() {
        let driver = ClockDriver::new(MediaChannel::Audio);
        driver.load("https://cdn.example/t1.mp3").await;
        assert!((driver.position().await - 0.0).abs() < f64::EPSILON);

        driver.play().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((driver.position().await - 5.0).abs() < 0.01);

        driver.pause().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((driver.position().await - 5.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_moves_the_clock() {
        let driver = ClockDriver::new(MediaChannel::Audio);
        driver.load("https://cdn.example/t1.mp3").await;
        driver.play().await.unwrap();
        driver.seek(42.0).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!((driver.position().await - 44.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_event_at_clip_end() {
        let driver = ClockDriver::new(MediaChannel::Audio);
        driver.set_source_duration("short.mp3", 3.0).await;
        let mut events = driver.subscribe();
        driver.load("short.mp3").await;
        // Drain the Ready event.
        let _ = events.recv().await;

        driver.play().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((driver.position().await - 3.0).abs() < f64::EPSILON);
        assert!(!driver.is_playing().await);
        assert!(matches!(events.recv().await, Ok(DriverEvent::Ended)));
    }

    #[tokio::test]
    async fn test_play_distinguishes_decode_from_autoplay() {
        let driver = ClockDriver::new(MediaChannel::Audio);
        driver.fail_source("bad.mp3").await;
        driver.load("bad.mp3").await;
        assert!(matches!(
            driver.play().await,
            Err(PlaybackError::Decode { .. })
        ));

        driver.load("good.mp3").await;
        driver.set_autoplay_blocked(true).await;
        assert_eq!(driver.play().await, Err(PlaybackError::AutoplayBlocked));
        driver.set_autoplay_blocked(false).await;
        assert!(driver.play().await.is_ok());
    }

    #[tokio::test]
    async fn test_effective_level_combines_volume_gain_mute() {
        let driver = ClockDriver::new(MediaChannel::Audio);
        driver.set_volume(0.8).await;
        assert!((driver.effective_level().await - 0.8).abs() < f32::EPSILON);

        driver.set_gain(0.0).await;
        assert!((driver.effective_level().await - 0.0).abs() < f32::EPSILON);

        driver.set_gain(1.0).await;
        driver.set_muted(true).await;
        assert!((driver.effective_level().await - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_next_track_index_never_repeats() {
        assert_eq!(next_track_index(0, None, AdvancePolicy::Shuffle), None);
        assert_eq!(next_track_index(1, Some(0), AdvancePolicy::Shuffle), Some(0));
        for _ in 0..50 {
            let next = next_track_index(3, Some(1), AdvancePolicy::Shuffle);
            assert!(matches!(next, Some(0 | 2)));
        }
        assert_eq!(
            next_track_index(3, Some(2), AdvancePolicy::Sequential),
            Some(0)
        );
        assert_eq!(next_track_index(3, None, AdvancePolicy::Sequential), Some(0));
    }
}
