//! Music ducking while bulletins are on air.
//!
//! Narration must always be intelligible: while any of the three engines
//! is speaking, the music channel's gain is forced to exact zero, not
//! merely attenuated. The gain path is separate from the user's volume
//! slider, which comes back untouched when the last engine clears.

use crate::driver::PlaybackDriver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The three narration engines, distinguished only by what triggers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Top-of-hour news bulletin.
    Hourly,
    /// Bulletin started by an explicit admin action.
    Manual,
    /// Bulletin fired by a breaking-news condition.
    Breaking,
}

impl EngineKind {
    pub const ALL: [Self; 3] = [Self::Hourly, Self::Manual, Self::Breaking];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Hourly => 0,
            Self::Manual => 1,
            Self::Breaking => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Manual => "manual",
            Self::Breaking => "breaking",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast whenever the global ducking signal flips.
#[derive(Debug, Clone, Copy)]
pub struct DuckingChange {
    pub active: bool,
}

/// Outcome of an engine asking for the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnAirDecision {
    Granted,
    /// Another engine is already speaking.
    Occupied,
    /// The station is off for this client; narration must stay silent.
    NotAllowed,
}

struct DuckState {
    flags: [bool; 3],
    allowed: bool,
}

impl DuckState {
    fn any(&self) -> bool {
        self.flags.iter().any(|flag| *flag)
    }
}

/// Shared ducking state injected into every narration engine.
pub struct DuckingContext {
    audio: Arc<dyn PlaybackDriver>,
    inner: Mutex<DuckState>,
    // Swapped for a fresh token on every stop, so sequences hold the
    // generation they started under and a stop only cancels those.
    stop_token: Mutex<CancellationToken>,
    event_tx: broadcast::Sender<DuckingChange>,
    release_linger: Duration,
}

impl DuckingContext {
    #[must_use]
    pub fn new(audio: Arc<dyn PlaybackDriver>, release_linger: Duration) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            audio,
            inner: Mutex::new(DuckState {
                flags: [false; 3],
                allowed: false,
            }),
            stop_token: Mutex::new(CancellationToken::new()),
            event_tx,
            release_linger,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DuckingChange> {
        self.event_tx.subscribe()
    }

    /// Gate for starting sequences: the station must nominally be on for
    /// this client before narration may produce audio.
    pub async fn set_allowed(&self, allowed: bool) {
        self.inner.lock().await.allowed = allowed;
    }

    pub async fn allowed(&self) -> bool {
        self.inner.lock().await.allowed
    }

    /// Whether any engine currently holds the air.
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.any()
    }

    /// The cancellation token for a sequence starting now.
    pub async fn sequence_token(&self) -> CancellationToken {
        self.stop_token.lock().await.clone()
    }

    /// Atomically claim the air for one engine. At most one engine speaks
    /// at a time, and nothing speaks into a station that is nominally off.
    pub async fn try_go_on_air(&self, engine: EngineKind) -> OnAirDecision {
        let mut inner = self.inner.lock().await;
        if !inner.allowed {
            return OnAirDecision::NotAllowed;
        }
        if inner.any() {
            return OnAirDecision::Occupied;
        }
        inner.flags[engine.index()] = true;
        debug!("Ducking music for {engine} bulletin");
        self.audio.set_gain(0.0).await;
        let _ = self.event_tx.send(DuckingChange { active: true });
        OnAirDecision::Granted
    }

    /// Raise an engine's ducking flag, silencing the music channel the
    /// moment the first flag goes up.
    pub async fn duck(&self, engine: EngineKind) {
        let mut inner = self.inner.lock().await;
        let was_active = inner.any();
        inner.flags[engine.index()] = true;
        if !was_active {
            debug!("Ducking music for {engine} bulletin");
            self.audio.set_gain(0.0).await;
            let _ = self.event_tx.send(DuckingChange { active: true });
        }
    }

    /// Clear an engine's ducking flag after a short linger, restoring the
    /// music gain when no other engine holds the air.
    pub async fn release(&self, engine: EngineKind) {
        if !self.release_linger.is_zero() {
            tokio::time::sleep(self.release_linger).await;
        }
        let mut inner = self.inner.lock().await;
        inner.flags[engine.index()] = false;
        if !inner.any() {
            debug!("Last bulletin cleared, restoring music gain");
            self.audio.set_gain(1.0).await;
            let _ = self.event_tx.send(DuckingChange { active: false });
        }
    }

    /// Immediate teardown: cancel the running generation of sequences,
    /// clear every flag, and restore the music gain with no linger.
    pub async fn stop_all(&self) {
        info!("Stop signal: tearing down all bulletins");
        {
            let mut token = self.stop_token.lock().await;
            token.cancel();
            *token = CancellationToken::new();
        }
        let mut inner = self.inner.lock().await;
        let was_active = inner.any();
        inner.flags = [false; 3];
        if was_active {
            self.audio.set_gain(1.0).await;
            let _ = self.event_tx.send(DuckingChange { active: false });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ClockDriver, MediaChannel};

    fn context(linger_ms: u64) -> (Arc<DuckingContext>, Arc<ClockDriver>) {
        let audio = ClockDriver::new(MediaChannel::Audio);
        let ducking = DuckingContext::new(audio.clone(), Duration::from_millis(linger_ms));
        (ducking, audio)
    }

    #[tokio::test(start_paused = true)]
    async fn test_gain_zero_iff_any_engine_ducking() {
        let (ducking, audio) = context(0);
        audio.set_volume(0.7).await;

        ducking.duck(EngineKind::Hourly).await;
        assert!((audio.gain().await - 0.0).abs() < f32::EPSILON);
        assert!(ducking.is_active().await);

        // A second engine piling on keeps the gain at zero.
        ducking.duck(EngineKind::Breaking).await;
        ducking.release(EngineKind::Hourly).await;
        assert!((audio.gain().await - 0.0).abs() < f32::EPSILON);

        // The last one out restores the user's level untouched.
        ducking.release(EngineKind::Breaking).await;
        assert!((audio.gain().await - 1.0).abs() < f32::EPSILON);
        assert!((audio.volume().await - 0.7).abs() < f32::EPSILON);
        assert!(!ducking.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_linger_delays_restore() {
        let (ducking, audio) = context(250);
        ducking.duck(EngineKind::Manual).await;
        assert!((audio.gain().await - 0.0).abs() < f32::EPSILON);

        // Release sleeps through the linger window before restoring.
        ducking.release(EngineKind::Manual).await;
        assert!((audio.gain().await - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_clears_flags_and_cancels() {
        let (ducking, audio) = context(0);
        let token = ducking.sequence_token().await;
        ducking.duck(EngineKind::Hourly).await;
        ducking.duck(EngineKind::Manual).await;

        ducking.stop_all().await;

        assert!(token.is_cancelled());
        assert!(!ducking.is_active().await);
        assert!((audio.gain().await - 1.0).abs() < f32::EPSILON);
        // The next sequence gets a fresh, uncancelled generation.
        assert!(!ducking.sequence_token().await.is_cancelled());
    }

    #[tokio::test]
    async fn test_allowed_gate() {
        let (ducking, _) = context(0);
        assert!(!ducking.allowed().await);
        ducking.set_allowed(true).await;
        assert!(ducking.allowed().await);
    }
}
