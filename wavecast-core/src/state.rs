//! The shared station record and its partial-update shape.

use crate::time::elapsed_secs;
use serde::{Deserialize, Serialize};

/// The single shared record describing what the station is broadcasting.
///
/// Written only by the admin session, read by everyone else. The record is
/// a snapshot, not a command stream: the transport may reorder or duplicate
/// notifications, so consumers recompute playback position from
/// `current_offset` plus `timestamp` instead of trusting deltas, and drop
/// anything older than what they already applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StationState {
    /// Audio channel foreground-active flag.
    pub is_playing: bool,
    /// Video channel foreground-active flag. The record can transiently
    /// hold this together with `is_playing`; the exclusivity arbiter
    /// resolves the conflict locally on every client.
    pub is_tv_active: bool,
    pub current_track_id: Option<String>,
    /// Omitted when the admin's copy of the track is a purely local
    /// reference other clients cannot resolve; listeners then resolve the
    /// track by id against their own media library.
    pub current_track_url: Option<String>,
    pub current_track_name: String,
    /// Audio playback position in seconds at the moment of `timestamp`.
    pub current_offset: f64,
    /// Wall-clock epoch milliseconds when this state was written.
    pub timestamp: i64,
    pub current_video_id: Option<String>,
    /// Ordered list of externally-hosted video URLs currently live.
    pub tv_playlist: Vec<String>,
    /// Session id of the publishing admin.
    pub writer_session: Option<String>,
}

impl Default for StationState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_tv_active: false,
            current_track_id: None,
            current_track_url: None,
            current_track_name: String::new(),
            current_offset: 0.0,
            timestamp: 0,
            current_video_id: None,
            tv_playlist: Vec::new(),
            writer_session: None,
        }
    }
}

impl StationState {
    /// Authoritative playback position at `now_ms`, compensating for the
    /// time the snapshot spent in flight. A paused station does not
    /// advance; the result is never negative.
    #[must_use]
    pub fn compensated_offset(&self, now_ms: i64) -> f64 {
        let base = self.current_offset.max(0.0);
        if !self.is_playing {
            return base;
        }
        base + elapsed_secs(self.timestamp, now_ms)
    }

    /// Whether the audio asset differs between two snapshots.
    #[must_use]
    pub fn track_changed(&self, other: &Self) -> bool {
        self.current_track_id != other.current_track_id
            || self.current_track_url != other.current_track_url
    }

    /// Whether the audio play flag flipped.
    #[must_use]
    pub const fn play_toggled(&self, other: &Self) -> bool {
        self.is_playing != other.is_playing
    }

    /// Whether the video channel flag flipped.
    #[must_use]
    pub const fn tv_toggled(&self, other: &Self) -> bool {
        self.is_tv_active != other.is_tv_active
    }

    /// Whether the video asset or playlist differs.
    #[must_use]
    pub fn tv_feed_changed(&self, other: &Self) -> bool {
        self.current_video_id != other.current_video_id || self.tv_playlist != other.tv_playlist
    }

    /// Whether `other` represents a position jump rather than normal
    /// elapsed-time progress, judged at `other`'s own timestamp.
    #[must_use]
    pub fn seek_occurred(&self, other: &Self, threshold_secs: f64) -> bool {
        if self.track_changed(other) {
            return false;
        }
        let expected = self.compensated_offset(other.timestamp);
        (other.current_offset - expected).abs() > threshold_secs
    }
}

/// A track choice as published to other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSelection {
    pub id: Option<String>,
    /// `None` when the admin's URL is not externally resolvable.
    pub url: Option<String>,
    pub name: String,
}

/// A video-channel selection as published to other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvSelection {
    pub video_id: Option<String>,
    pub playlist: Vec<String>,
}

/// Partial update written on a locally-initiated change. Absent fields
/// leave the stored record untouched; `timestamp` is always present and
/// stamps the write for last-write-wins resolution at the consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StationDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_tv_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv: Option<TvSelection>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_session: Option<String>,
}

impl StationDelta {
    /// A delta carrying nothing but its stamp.
    #[must_use]
    pub fn stamped(timestamp: i64, writer_session: &str) -> Self {
        Self {
            timestamp,
            writer_session: Some(writer_session.to_string()),
            ..Self::default()
        }
    }

    /// A delta republishing the complete state, used by the heartbeat.
    #[must_use]
    pub fn full(state: &StationState, timestamp: i64, writer_session: &str) -> Self {
        Self {
            is_playing: Some(state.is_playing),
            is_tv_active: Some(state.is_tv_active),
            track: Some(TrackSelection {
                id: state.current_track_id.clone(),
                url: state.current_track_url.clone(),
                name: state.current_track_name.clone(),
            }),
            current_offset: Some(state.current_offset),
            tv: Some(TvSelection {
                video_id: state.current_video_id.clone(),
                playlist: state.tv_playlist.clone(),
            }),
            timestamp,
            writer_session: Some(writer_session.to_string()),
        }
    }

    #[must_use]
    pub fn with_playing(mut self, playing: bool) -> Self {
        self.is_playing = Some(playing);
        self
    }

    #[must_use]
    pub fn with_tv_active(mut self, active: bool) -> Self {
        self.is_tv_active = Some(active);
        self
    }

    #[must_use]
    pub fn with_track(mut self, track: TrackSelection) -> Self {
        self.track = Some(track);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.current_offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_tv(mut self, tv: TvSelection) -> Self {
        self.tv = Some(tv);
        self
    }

    /// Merge this delta into a stored record.
    pub fn apply_to(&self, state: &mut StationState) {
        if let Some(playing) = self.is_playing {
            state.is_playing = playing;
        }
        if let Some(active) = self.is_tv_active {
            state.is_tv_active = active;
        }
        if let Some(ref track) = self.track {
            state.current_track_id = track.id.clone();
            state.current_track_url = track.url.clone();
            state.current_track_name = track.name.clone();
        }
        if let Some(offset) = self.current_offset {
            state.current_offset = offset;
        }
        if let Some(ref tv) = self.tv {
            state.current_video_id = tv.video_id.clone();
            state.tv_playlist = tv.playlist.clone();
        }
        state.timestamp = self.timestamp;
        if self.writer_session.is_some() {
            state.writer_session = self.writer_session.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_state(offset: f64, timestamp: i64) -> StationState {
        StationState {
            is_playing: true,
            current_track_id: Some("t1".to_string()),
            current_track_name: "Track One".to_string(),
            current_offset: offset,
            timestamp,
            ..StationState::default()
        }
    }

    #[test]
    fn test_compensated_offset_advances_while_playing() {
        let state = playing_state(10.0, 5_000);
        assert!((state.compensated_offset(8_000) - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compensated_offset_frozen_while_paused() {
        let mut state = playing_state(10.0, 5_000);
        state.is_playing = false;
        assert!((state.compensated_offset(60_000) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compensated_offset_clock_skew() {
        // A consumer whose clock is behind the producer never rewinds.
        let state = playing_state(10.0, 5_000);
        assert!((state.compensated_offset(3_000) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_track_changed_by_id() {
        let a = playing_state(0.0, 1_000);
        let mut b = a.clone();
        b.current_track_id = Some("t2".to_string());
        assert!(a.track_changed(&b));
        assert!(!a.track_changed(&a.clone()));
    }

    #[test]
    fn test_seek_occurred_only_on_jump() {
        let a = playing_state(10.0, 5_000);
        // Two seconds later at position 12: normal progress.
        let b = playing_state(12.0, 7_000);
        assert!(!a.seek_occurred(&b, 2.0));
        // Two seconds later at position 40: a jump.
        let c = playing_state(40.0, 7_000);
        assert!(a.seek_occurred(&c, 2.0));
    }

    #[test]
    fn test_seek_not_reported_across_track_change() {
        let a = playing_state(100.0, 5_000);
        let mut b = playing_state(0.0, 6_000);
        b.current_track_id = Some("t2".to_string());
        assert!(!a.seek_occurred(&b, 2.0));
    }

    #[test]
    fn test_delta_merge_preserves_absent_fields() {
        let mut state = playing_state(10.0, 5_000);
        let delta = StationDelta::stamped(6_000, "admin-1").with_playing(false);
        delta.apply_to(&mut state);
        assert!(!state.is_playing);
        assert_eq!(state.current_track_id.as_deref(), Some("t1"));
        assert_eq!(state.timestamp, 6_000);
        assert_eq!(state.writer_session.as_deref(), Some("admin-1"));
    }

    #[test]
    fn test_delta_track_update_clears_stale_url() {
        let mut state = playing_state(0.0, 1_000);
        state.current_track_url = Some("https://cdn.example/t1.mp3".to_string());
        let delta = StationDelta::stamped(2_000, "admin-1").with_track(TrackSelection {
            id: Some("t2".to_string()),
            url: None,
            name: "Track Two".to_string(),
        });
        delta.apply_to(&mut state);
        assert_eq!(state.current_track_id.as_deref(), Some("t2"));
        assert!(state.current_track_url.is_none());
    }

    #[test]
    fn test_delta_serialization_omits_absent_fields() {
        let delta = StationDelta::stamped(1_000, "admin-1").with_playing(true);
        let json = serde_json::to_value(&delta).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("isPlaying"));
        assert!(object.contains_key("timestamp"));
        assert!(!object.contains_key("track"));
        assert!(!object.contains_key("tv"));
    }

    #[test]
    fn test_state_wire_shape_is_camel_case() {
        let state = playing_state(1.5, 9_000);
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("isPlaying").is_some());
        assert!(json.get("currentTrackId").is_some());
        assert!(json.get("currentOffset").is_some());
        assert!(json.get("tvPlaylist").is_some());
    }

    #[test]
    fn test_full_delta_round_trip() {
        let state = playing_state(42.0, 5_000);
        let delta = StationDelta::full(&state, 6_000, "admin-1");
        let mut rebuilt = StationState::default();
        delta.apply_to(&mut rebuilt);
        assert_eq!(rebuilt.current_track_id, state.current_track_id);
        assert!((rebuilt.current_offset - 42.0).abs() < f64::EPSILON);
        assert_eq!(rebuilt.timestamp, 6_000);
    }
}
