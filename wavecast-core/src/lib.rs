//! Station synchronization engine for a live radio/TV broadcast.
//!
//! One admin session publishes the shared station state; every listener
//! session reconciles its local audio/video playback against it over a
//! low-frequency poll/notify channel, with latency compensation and
//! continuous drift correction. Local arbiters keep the two media
//! channels exclusive and duck the music while automated news bulletins
//! are on air.

pub mod arbiter;
pub mod channel;
pub mod config;
pub mod drift;
pub mod driver;
pub mod ducking;
pub mod error;
pub mod library;
pub mod narration;
pub mod paths;
pub mod publisher;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
pub mod time;

pub use arbiter::{ArbiterAction, ChannelFlags, ExclusivityArbiter, ExclusivityGuard};
pub use channel::{RadioChannel, TvChannel};
pub use config::{build_config_template, RoleSetting, StationConfig};
pub use drift::{DriftBasis, DriftCorrector, DriftThresholds, StallAction, StallWatchdog};
pub use driver::{
    next_track_index, AdvancePolicy, ClockDriver, DriverEvent, MediaChannel, PlaybackDriver,
};
pub use ducking::{DuckingChange, DuckingContext, EngineKind, OnAirDecision};
pub use error::{CoreError, PlaybackError, Result};
pub use library::{MediaLibrary, MemoryLibrary, TrackRef};
pub use narration::{
    EngineScripts, NarrationEngine, NarrationOutput, NarrationSettings, Newsroom, ScriptSource,
    SpeechSynthesizer, SynthesisResult, TriggerOutcome,
};
pub use paths::{config_dir, config_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use publisher::{publishable_url, StatePublisher};
pub use reconcile::{ReconcilerSettings, StateReconciler};
pub use session::{Role, SessionContext};
pub use state::{StationDelta, StationState, TrackSelection, TvSelection};
pub use store::{ChangeNotice, MemoryStore, StateStore, StoreTable};
pub use sync::{SnapshotDisposition, StationEvent, StationSync};
pub use time::{elapsed_secs, epoch_ms, DurationExt};
