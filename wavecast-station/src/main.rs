mod output;
mod wire;

use crate::output::LogNarrationOutput;
use crate::wire::WireScriptSource;
use chrono::Timelike;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wavecast_core::{
    ClockDriver, CoreError, DuckingContext, EngineKind, EngineScripts, ExclusivityGuard,
    MediaChannel, MediaLibrary, MemoryLibrary, NarrationEngine, NarrationOutput, Newsroom,
    PlaybackDriver, RadioChannel, Role, ScriptSource, SessionContext, SpeechSynthesizer,
    StateReconciler, StatePublisher, StateStore, StationConfig, StationEvent, StationSync,
    StoreTable, TvChannel,
};
use wavecast_speech::{HttpSpeechSynthesizer, JingleCache};
use wavecast_store::{HttpStateStore, StorePoller};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match StationConfig::load_or_create() {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            info!("Wrote config template to {path:?}; edit it and restart");
            return;
        }
        Err(error) => {
            error!("{error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = run(config).await {
        error!("{error}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(config: StationConfig) -> wavecast_core::Result<()> {
    let role = config.station.role.to_role();
    let session = SessionContext::new(role);
    let session_id = session.session_id.clone();
    info!(
        "Starting {} as {:?} (session {session_id})",
        config.station.name, role
    );
    let sync = StationSync::new(session);

    let store = Arc::new(
        HttpStateStore::new(&config.store.endpoint, config.store.api_key.clone())
            .map_err(CoreError::from)?,
    );
    let store_dyn: Arc<dyn StateStore> = store.clone();

    let audio = ClockDriver::new(MediaChannel::Audio);
    let video = ClockDriver::new(MediaChannel::Video);
    let audio_dyn: Arc<dyn PlaybackDriver> = audio.clone();
    let video_dyn: Arc<dyn PlaybackDriver> = video.clone();

    let library = MemoryLibrary::with_tracks(
        config
            .library
            .tracks
            .iter()
            .cloned()
            .map(Into::into)
            .collect(),
    );
    let library_dyn: Arc<dyn MediaLibrary> = library.clone();

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let poller = StorePoller::new(
        store.clone(),
        config.store.poll_interval_ms,
        cancel.child_token(),
    );
    tasks.push(poller.start());

    let publisher = if role.is_admin() {
        let publisher = StatePublisher::new(
            store_dyn.clone(),
            sync.clone(),
            audio_dyn.clone(),
            session_id.clone(),
            config.heartbeat(),
            cancel.child_token(),
        );
        tasks.push(publisher.clone().start());
        Some(publisher)
    } else {
        None
    };

    let reconciler = StateReconciler::new(
        sync.clone(),
        store_dyn.clone(),
        audio_dyn.clone(),
        video_dyn.clone(),
        library_dyn.clone(),
        config.reconciler_settings(),
        cancel.child_token(),
    );
    // A headless client has no autoplay policy to respect; join outright.
    if !role.is_admin() {
        reconciler.join_broadcast(wavecast_core::epoch_ms()).await;
    }
    tasks.push(reconciler.clone().start());

    let guard = ExclusivityGuard::new(
        role,
        sync.clone(),
        audio_dyn.clone(),
        video_dyn.clone(),
        publisher.clone(),
        cancel.child_token(),
    );
    tasks.push(guard.start());

    let ducking = DuckingContext::new(audio_dyn.clone(), config.release_linger());

    let jingle_cache = if config.speech.cache_enabled {
        match JingleCache::new().await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(cache_error) => {
                warn!("Jingle cache unavailable: {cache_error}");
                None
            }
        }
    } else {
        None
    };
    let synth: Arc<dyn SpeechSynthesizer> = Arc::new(
        HttpSpeechSynthesizer::new(
            &config.speech.endpoint,
            config.speech.api_key.clone(),
            jingle_cache,
        )
        .map_err(|speech_error| CoreError::SpeechUnavailable {
            reason: speech_error.to_string(),
        })?,
    );
    let narration_output: Arc<dyn NarrationOutput> = Arc::new(LogNarrationOutput::new());

    let engines = EngineKind::ALL.map(|kind| {
        let wire: Arc<dyn ScriptSource> =
            Arc::new(WireScriptSource::new(&config.store.endpoint, kind));
        NarrationEngine::new(
            kind,
            ducking.clone(),
            synth.clone(),
            wire,
            narration_output.clone(),
            sync.clone(),
            EngineScripts::for_kind(kind, &config.station.name),
            config.narration_settings(),
        )
    });
    let newsroom = Newsroom::new(ducking.clone(), sync.clone(), engines);

    // The admin desk: go live on the configured feed, or start the deck
    // on the catalog.
    if role.is_admin() {
        let radio = RadioChannel::new(
            audio_dyn.clone(),
            library_dyn.clone(),
            sync.clone(),
            publisher.clone(),
            config.station.advance.to_policy(),
            cancel.child_token(),
        );
        tasks.push(radio.clone().start());
        let tv = TvChannel::new(video_dyn.clone(), sync.clone(), publisher.clone());

        if let Some(feed) = &config.station.tv_feed {
            if let Err(tv_error) = tv.go_live(Some(feed.clone()), Vec::new()).await {
                warn!("Could not start the TV feed: {tv_error}");
            }
        } else if library.is_loaded().await && !library.tracks().await.is_empty() {
            if let Err(play_error) = radio.play_index(0).await {
                warn!("Could not start the deck: {play_error}");
            }
        } else {
            info!("Library empty; waiting for catalog");
        }
    }

    tasks.push(spawn_station_loop(
        sync.clone(),
        store_dyn.clone(),
        ducking.clone(),
        newsroom.clone(),
        video_dyn.clone(),
        role,
        cancel.child_token(),
    ));

    // Announced last so the station loop is already listening for the
    // monitor cue.
    if let Some(publisher) = &publisher {
        publisher.announce_admin().await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    newsroom.stop_all().await;
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Background glue: keeps the narration gate in step with the station
/// state, runs the top-of-hour schedule, and fires the breaking engine on
/// news invalidation notices.
fn spawn_station_loop(
    sync: Arc<StationSync>,
    store: Arc<dyn StateStore>,
    ducking: Arc<DuckingContext>,
    newsroom: Arc<Newsroom>,
    video: Arc<dyn PlaybackDriver>,
    role: Role,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = sync.subscribe();
        let mut notices = store.subscribe();
        let mut schedule = tokio::time::interval(std::time::Duration::from_secs(30));
        schedule.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(StationEvent::StatusMessage { text }) => info!("Status: {text}"),
                    Ok(StationEvent::JoinPrompt) => {
                        info!("Broadcast live; tap to join");
                    }
                    Ok(StationEvent::ConflictSuspected { writer_session, .. }) => {
                        warn!("Possible second admin: {writer_session}");
                    }
                    Ok(StationEvent::MonitorStarted { video_id, playlist }) => {
                        // The desk monitor always receives the feed, muted
                        // until the exclusivity guard says otherwise.
                        if let Some(source) = video_id.or_else(|| playlist.first().cloned()) {
                            video.load(&source).await;
                            video.set_muted(true).await;
                            if let Err(monitor_error) = video.play().await {
                                warn!("Monitor feed unavailable: {monitor_error}");
                            }
                        }
                    }
                    Ok(_) => refresh_gate(&sync, &ducking, role).await,
                    Err(RecvError::Lagged(_)) => refresh_gate(&sync, &ducking, role).await,
                    Err(RecvError::Closed) => break,
                },
                notice = notices.recv() => match notice {
                    Ok(notice) if notice.table == StoreTable::NewsItems => {
                        // A fresh wire item while live is breaking news.
                        let outcome = newsroom.trigger(EngineKind::Breaking).await;
                        info!("Breaking bulletin: {outcome:?}");
                    }
                    Ok(notice) if notice.table == StoreTable::Messages => {
                        info!("Station messages updated");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
                _ = schedule.tick() => {
                    refresh_gate(&sync, &ducking, role).await;
                    let hour = chrono::Local::now().hour();
                    if let Some(outcome) = newsroom.hourly_tick(hour).await {
                        info!("Hourly bulletin: {outcome:?}");
                    }
                }
            }
        }
    })
}

/// Narration is gated on the station being audible for this client: the
/// master play flag for the admin, a joined listener otherwise.
async fn refresh_gate(sync: &StationSync, ducking: &DuckingContext, role: Role) {
    let allowed = if role.is_admin() {
        sync.state().await.is_playing
    } else {
        sync.session().await.has_started_listening
    };
    ducking.set_allowed(allowed).await;
}
