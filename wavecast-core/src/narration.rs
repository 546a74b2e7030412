//! Automated news-bulletin narration engines.
//!
//! Each engine turns a fetched script into a fixed on-air sequence:
//! background bed starts looping low, the opening jingle plays out, a
//! pacing pause, the narration itself, the bed fades, the closing jingle
//! lands. Asset preparation overlaps the script fetch. Whatever happens
//! inside a sequence, the busy and ducking flags are released on every
//! exit path; a single failed bulletin must never strand the music
//! channel silent or wedge future triggers.

use crate::ducking::{DuckingContext, EngineKind, OnAirDecision};
use crate::error::{CoreError, Result};
use crate::sync::StationSync;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a speech-synthesis request.
///
/// An explicit tagged type: either real audio, an instruction to speak the
/// plain text through the on-device voice, or nothing usable at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisResult {
    Audio { bytes: Vec<u8> },
    FallbackText { script: String },
    Failed,
}

impl SynthesisResult {
    #[must_use]
    pub const fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }
}

/// Text-to-speech capability, consumed as an opaque service.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize narration audio for a script. Implementations return
    /// [`SynthesisResult::FallbackText`] when the service fails but the
    /// script can still be spoken on-device.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> SynthesisResult;

    /// Synthesize a short jingle/stinger. Implementations cache these by a
    /// content hash of the text so repeated jingles never re-synthesize.
    async fn synthesize_jingle(&self, text: &str) -> SynthesisResult;
}

/// Source of bulletin scripts; news-wire fetching and composition live
/// behind this.
#[async_trait::async_trait]
pub trait ScriptSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compose the narration script for one bulletin.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ScriptUnavailable`] when the wire cannot be
    /// reached or yields nothing usable.
    async fn compose(&self) -> Result<String>;
}

/// The audio sink a narration sequence plays into.
#[async_trait::async_trait]
pub trait NarrationOutput: Send + Sync {
    /// Start the looping background bed at the given level. Returns once
    /// the bed is rolling.
    ///
    /// # Errors
    ///
    /// Returns an error when the bed cannot start; the sequence continues
    /// without it.
    async fn play_bed(&self, audio: &[u8], volume: f32) -> Result<()>;

    /// Fade the bed out and stop it.
    async fn fade_out_bed(&self);

    /// Play one clip to completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the clip cannot be decoded or played.
    async fn play_clip(&self, audio: &[u8]) -> Result<()>;

    /// Speak plain text through the on-device voice, to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SpeechUnavailable`] when no on-device voice
    /// exists.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Hard-stop anything currently sounding.
    async fn stop(&self);
}

/// Jingle and bed scripts for one engine.
#[derive(Debug, Clone)]
pub struct EngineScripts {
    pub opening: String,
    pub closing: String,
    pub bed: String,
}

impl EngineScripts {
    /// Stock jingle lines for a station name.
    #[must_use]
    pub fn for_kind(kind: EngineKind, station_name: &str) -> Self {
        match kind {
            EngineKind::Hourly => Self {
                opening: format!("{station_name} news, on the hour"),
                closing: format!("You are listening to {station_name}"),
                bed: format!("{station_name} newsroom bed"),
            },
            EngineKind::Manual => Self {
                opening: format!("{station_name} studio update"),
                closing: format!("More soon on {station_name}"),
                bed: format!("{station_name} studio bed"),
            },
            EngineKind::Breaking => Self {
                opening: format!("Breaking news from {station_name}"),
                closing: format!("Stay tuned to {station_name}"),
                bed: format!("{station_name} breaking bed"),
            },
        }
    }
}

/// Tuning knobs of the on-air sequence.
#[derive(Debug, Clone)]
pub struct NarrationSettings {
    /// Pause between the opening jingle and the narration.
    pub pacing_pause: Duration,
    /// Bed level while narration plays.
    pub bed_volume: f32,
    /// Preferred synthesis voice.
    pub voice: Option<String>,
}

impl Default for NarrationSettings {
    fn default() -> Self {
        Self {
            pacing_pause: Duration::from_millis(600),
            bed_volume: 0.2,
            voice: None,
        }
    }
}

/// Result of asking an engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// This engine is already mid-sequence; the trigger is a no-op.
    Busy,
    /// Another engine holds the air.
    OnAir,
    /// The station is off for this client.
    NotAllowed,
}

/// One independent narration engine.
pub struct NarrationEngine {
    kind: EngineKind,
    ducking: Arc<DuckingContext>,
    synth: Arc<dyn SpeechSynthesizer>,
    wire: Arc<dyn ScriptSource>,
    output: Arc<dyn NarrationOutput>,
    sync: Arc<StationSync>,
    jingles: EngineScripts,
    settings: NarrationSettings,
    busy: AtomicBool,
}

impl NarrationEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: EngineKind,
        ducking: Arc<DuckingContext>,
        synth: Arc<dyn SpeechSynthesizer>,
        wire: Arc<dyn ScriptSource>,
        output: Arc<dyn NarrationOutput>,
        sync: Arc<StationSync>,
        jingles: EngineScripts,
        settings: NarrationSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            ducking,
            synth,
            wire,
            output,
            sync,
            jingles,
            settings,
            busy: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> EngineKind {
        self.kind
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a bulletin in the background.
    pub async fn trigger(self: Arc<Self>) -> TriggerOutcome {
        match self.acquire().await {
            Ok(token) => {
                tokio::spawn(async move {
                    self.run_sequence(token).await;
                });
                TriggerOutcome::Started
            }
            Err(outcome) => outcome,
        }
    }

    /// Run a bulletin to completion before returning. Same guards as
    /// [`Self::trigger`].
    pub async fn trigger_blocking(&self) -> TriggerOutcome {
        match self.acquire().await {
            Ok(token) => {
                self.run_sequence(token).await;
                TriggerOutcome::Started
            }
            Err(outcome) => outcome,
        }
    }

    async fn acquire(&self) -> std::result::Result<CancellationToken, TriggerOutcome> {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!("{} engine busy, trigger ignored", self.kind);
            return Err(TriggerOutcome::Busy);
        }
        let token = self.ducking.sequence_token().await;
        match self.ducking.try_go_on_air(self.kind).await {
            OnAirDecision::Granted => Ok(token),
            OnAirDecision::Occupied => {
                self.busy.store(false, Ordering::SeqCst);
                debug!("{} engine denied: another bulletin on air", self.kind);
                Err(TriggerOutcome::OnAir)
            }
            OnAirDecision::NotAllowed => {
                self.busy.store(false, Ordering::SeqCst);
                Err(TriggerOutcome::NotAllowed)
            }
        }
    }

    async fn run_sequence(&self, token: CancellationToken) {
        info!("{} bulletin starting", self.kind);
        let result = self.sequence_body(&token).await;
        match &result {
            Ok(()) => info!("{} bulletin completed", self.kind),
            Err(error) => {
                warn!("{} bulletin failed: {error}", self.kind);
                self.sync
                    .emit_status(format!("{} bulletin interrupted", self.kind));
            }
        }
        // Cleanup on every exit path, success or not.
        self.output.stop().await;
        self.ducking.release(self.kind).await;
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn sequence_body(&self, token: &CancellationToken) -> Result<()> {
        // Bed and jingles render while the wire call is in flight.
        let (bed, opening, closing, script) = tokio::join!(
            self.synth.synthesize_jingle(&self.jingles.bed),
            self.synth.synthesize_jingle(&self.jingles.opening),
            self.synth.synthesize_jingle(&self.jingles.closing),
            self.wire.compose(),
        );
        let script = script?;
        // A stop may have landed while assets rendered; the results are
        // simply discarded.
        self.ensure_live(token)?;

        let narration = self
            .synth
            .synthesize(&script, self.settings.voice.as_deref())
            .await;
        self.ensure_live(token)?;

        if let SynthesisResult::Audio { bytes } = &bed {
            if let Err(error) = self.output.play_bed(bytes, self.settings.bed_volume).await {
                warn!("{} bed unavailable: {error}", self.kind);
            }
        }

        if let SynthesisResult::Audio { bytes } = &opening {
            self.play_guarded(token, bytes).await?;
        }

        self.pause_guarded(token, self.settings.pacing_pause).await?;

        match narration {
            SynthesisResult::Audio { bytes } => {
                self.play_guarded(token, &bytes).await?;
            }
            SynthesisResult::FallbackText { script } => {
                debug!("{} narration using on-device voice", self.kind);
                self.speak_guarded(token, &script).await?;
            }
            SynthesisResult::Failed => {
                return Err(CoreError::NarrationAborted {
                    reason: "no usable narration audio".to_string(),
                });
            }
        }

        self.output.fade_out_bed().await;

        if let SynthesisResult::Audio { bytes } = &closing {
            self.play_guarded(token, bytes).await?;
        }

        Ok(())
    }

    fn ensure_live(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            Err(CoreError::NarrationAborted {
                reason: "stopped".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn play_guarded(&self, token: &CancellationToken, bytes: &[u8]) -> Result<()> {
        tokio::select! {
            () = token.cancelled() => Err(CoreError::NarrationAborted {
                reason: "stopped".to_string(),
            }),
            result = self.output.play_clip(bytes) => result,
        }
    }

    async fn speak_guarded(&self, token: &CancellationToken, text: &str) -> Result<()> {
        tokio::select! {
            () = token.cancelled() => Err(CoreError::NarrationAborted {
                reason: "stopped".to_string(),
            }),
            result = self.output.speak(text) => result,
        }
    }

    async fn pause_guarded(&self, token: &CancellationToken, pause: Duration) -> Result<()> {
        tokio::select! {
            () = token.cancelled() => Err(CoreError::NarrationAborted {
                reason: "stopped".to_string(),
            }),
            () = tokio::time::sleep(pause) => Ok(()),
        }
    }
}

/// The three engines plus their shared teardown.
pub struct Newsroom {
    ducking: Arc<DuckingContext>,
    sync: Arc<StationSync>,
    engines: [Arc<NarrationEngine>; 3],
}

impl Newsroom {
    #[must_use]
    pub fn new(
        ducking: Arc<DuckingContext>,
        sync: Arc<StationSync>,
        engines: [Arc<NarrationEngine>; 3],
    ) -> Arc<Self> {
        Arc::new(Self {
            ducking,
            sync,
            engines,
        })
    }

    #[must_use]
    pub fn engine(&self, kind: EngineKind) -> &Arc<NarrationEngine> {
        &self.engines[kind.index()]
    }

    pub async fn trigger(&self, kind: EngineKind) -> TriggerOutcome {
        Arc::clone(self.engine(kind)).trigger().await
    }

    /// Tear down every engine immediately: in-flight audio stops, busy and
    /// ducking flags clear, music gain comes back.
    pub async fn stop_all(&self) {
        self.ducking.stop_all().await;
        for engine in &self.engines {
            engine.output.stop().await;
        }
    }

    /// Schedule tick: fire the hourly bulletin once per wall-clock hour.
    pub async fn hourly_tick(&self, hour: u32) -> Option<TriggerOutcome> {
        let session = self.sync.session().await;
        if session.last_hourly_trigger == Some(hour) {
            return None;
        }
        self.sync
            .update_session(|s| s.last_hourly_trigger = Some(hour))
            .await;
        Some(self.trigger(EngineKind::Hourly).await)
    }
}
