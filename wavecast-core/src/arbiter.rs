//! Audio/video exclusivity arbitration.
//!
//! The audio and video foreground flags travel in separate, unordered
//! network messages, so a one-shot toggle handler cannot keep them
//! consistent. The arbiter is therefore level-triggered: a pure guard that
//! re-evaluates the complete flag set on every relevant change and runs to
//! a fixpoint where at most one channel is audible.

use crate::driver::PlaybackDriver;
use crate::publisher::StatePublisher;
use crate::session::Role;
use crate::state::StationDelta;
use crate::sync::{StationEvent, StationSync};
use crate::time::epoch_ms;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The local audible-channel flags the arbiter guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelFlags {
    pub audio_foreground: bool,
    pub video_foreground: bool,
    pub video_muted: bool,
}

/// Side effects the caller must apply after a guard pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterAction {
    /// Stop local audio playback (non-admin resolution).
    StopAudio,
    /// Push an authoritative "audio stopped" correction (admin only).
    PublishAudioStopped,
    MuteVideo,
    UnmuteVideo,
    /// Push `is_tv_active = false` (admin only).
    PublishTvStopped,
}

/// Pure exclusivity rules for one client role.
#[derive(Debug, Clone, Copy)]
pub struct ExclusivityArbiter {
    role: Role,
}

impl ExclusivityArbiter {
    #[must_use]
    pub const fn new(role: Role) -> Self {
        Self { role }
    }

    /// Deliberate "audio channel on" edge: the video channel loses the
    /// foreground and is silenced.
    #[must_use]
    pub fn audio_on(&self, flags: ChannelFlags) -> (ChannelFlags, Vec<ArbiterAction>) {
        let mut next = flags;
        let mut actions = Vec::new();
        next.audio_foreground = true;
        if next.video_foreground {
            next.video_foreground = false;
            if self.role.is_admin() {
                actions.push(ArbiterAction::PublishTvStopped);
            }
        }
        if !next.video_muted {
            next.video_muted = true;
            actions.push(ArbiterAction::MuteVideo);
        }
        self.settle(next, actions)
    }

    /// Deliberate "video channel on" edge: audio stops and the video is
    /// unmuted.
    #[must_use]
    pub fn video_on(&self, flags: ChannelFlags) -> (ChannelFlags, Vec<ArbiterAction>) {
        let mut next = flags;
        let mut actions = Vec::new();
        next.video_foreground = true;
        if next.audio_foreground {
            next.audio_foreground = false;
            actions.push(if self.role.is_admin() {
                ArbiterAction::PublishAudioStopped
            } else {
                ArbiterAction::StopAudio
            });
        }
        if next.video_muted {
            next.video_muted = false;
            actions.push(ArbiterAction::UnmuteVideo);
        }
        self.settle(next, actions)
    }

    /// Level-triggered guard: re-assert the invariant on the current
    /// flags, whatever produced them.
    #[must_use]
    pub fn enforce(&self, flags: ChannelFlags) -> (ChannelFlags, Vec<ArbiterAction>) {
        let mut next = flags;
        let mut actions = Vec::new();

        if next.audio_foreground && next.video_foreground {
            if next.video_muted {
                // Video claims the foreground but is silent; audio keeps
                // the air and nothing audible conflicts.
            } else {
                // An unmuted foreground video wins over audio.
                next.audio_foreground = false;
                actions.push(if self.role.is_admin() {
                    ArbiterAction::PublishAudioStopped
                } else {
                    ArbiterAction::StopAudio
                });
            }
        } else if next.audio_foreground && !next.video_foreground && !next.video_muted {
            // Audio is on the air; a background video element must not
            // leak sound when its unmute arrives out of order.
            next.video_muted = true;
            actions.push(ArbiterAction::MuteVideo);
        }

        (next, actions)
    }

    /// Run the guard until the flags stop changing.
    #[must_use]
    pub fn enforce_fixpoint(&self, flags: ChannelFlags) -> (ChannelFlags, Vec<ArbiterAction>) {
        self.settle(flags, Vec::new())
    }

    fn settle(
        &self,
        mut flags: ChannelFlags,
        mut actions: Vec<ArbiterAction>,
    ) -> (ChannelFlags, Vec<ArbiterAction>) {
        // Two flags; the guard converges within a few passes.
        for _ in 0..4 {
            let (next, step_actions) = self.enforce(flags);
            let stable = next == flags && step_actions.is_empty();
            actions.extend(step_actions);
            flags = next;
            if stable {
                break;
            }
        }
        (flags, actions)
    }
}

/// Async wiring of the arbiter: watches station events, derives the flag
/// set from state plus the local video element, and applies the resulting
/// actions to drivers and (for the admin) the publisher.
pub struct ExclusivityGuard {
    arbiter: ExclusivityArbiter,
    sync: Arc<StationSync>,
    audio: Arc<dyn PlaybackDriver>,
    video: Arc<dyn PlaybackDriver>,
    publisher: Option<Arc<StatePublisher>>,
    cancel_token: CancellationToken,
}

impl ExclusivityGuard {
    #[must_use]
    pub fn new(
        role: Role,
        sync: Arc<StationSync>,
        audio: Arc<dyn PlaybackDriver>,
        video: Arc<dyn PlaybackDriver>,
        publisher: Option<Arc<StatePublisher>>,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            arbiter: ExclusivityArbiter::new(role),
            sync,
            audio,
            video,
            publisher,
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
        info!("Exclusivity guard watching channel flags");
        let mut events = self.sync.subscribe();
        // Catch up on whatever state existed before the guard started.
        self.evaluate().await;
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        // Missing events is fine for a level-triggered
                        // guard; re-evaluate from current state.
                        debug!("Guard lagged {missed} events, re-evaluating");
                        self.evaluate().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn handle_event(&self, event: &StationEvent) {
        match event {
            StationEvent::PlaybackStarted { .. }
            | StationEvent::PlaybackResumed { .. }
            | StationEvent::TrackChanged { .. } => {
                let flags = self.current_flags().await;
                let (next, actions) = self.arbiter.audio_on(flags);
                self.apply(next, &actions).await;
            }
            StationEvent::TvStarted { .. } => {
                let flags = self.current_flags().await;
                let (next, actions) = self.arbiter.video_on(flags);
                self.apply(next, &actions).await;
            }
            _ => self.evaluate().await,
        }
    }

    /// One level-triggered pass from the currently observable flags.
    pub async fn evaluate(&self) {
        let flags = self.current_flags().await;
        let (next, actions) = self.arbiter.enforce_fixpoint(flags);
        self.apply(next, &actions).await;
    }

    async fn current_flags(&self) -> ChannelFlags {
        let state = self.sync.state().await;
        ChannelFlags {
            audio_foreground: state.is_playing,
            video_foreground: state.is_tv_active,
            video_muted: self.video.is_muted().await,
        }
    }

    async fn apply(&self, _flags: ChannelFlags, actions: &[ArbiterAction]) {
        for action in actions {
            match action {
                ArbiterAction::StopAudio => {
                    warn!("Exclusivity: stopping local audio under live video");
                    self.audio.pause().await;
                    // A listener bumped off the audio channel has to join
                    // again deliberately.
                    self.sync
                        .update_session(|session| session.has_started_listening = false)
                        .await;
                }
                ArbiterAction::PublishAudioStopped => {
                    warn!("Exclusivity: publishing authoritative audio stop");
                    self.audio.pause().await;
                    let position = self.audio.position().await;
                    let now = epoch_ms();
                    self.sync.local_play_flag(false, position, now).await;
                    if let Some(publisher) = &self.publisher {
                        publisher
                            .publish_change(
                                StationDelta::stamped(now, publisher.session_id())
                                    .with_playing(false),
                            )
                            .await;
                    }
                }
                ArbiterAction::MuteVideo => self.video.set_muted(true).await,
                ArbiterAction::UnmuteVideo => self.video.set_muted(false).await,
                ArbiterAction::PublishTvStopped => {
                    let now = epoch_ms();
                    let state = self.sync.state().await;
                    self.sync
                        .local_tv(false, state.current_video_id.clone(), state.tv_playlist.clone(), now)
                        .await;
                    if let Some(publisher) = &self.publisher {
                        publisher
                            .publish_change(
                                StationDelta::stamped(now, publisher.session_id())
                                    .with_tv_active(false),
                            )
                            .await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_flag_combinations() -> Vec<ChannelFlags> {
        let mut combos = Vec::new();
        for audio in [false, true] {
            for video in [false, true] {
                for muted in [false, true] {
                    combos.push(ChannelFlags {
                        audio_foreground: audio,
                        video_foreground: video,
                        video_muted: muted,
                    });
                }
            }
        }
        combos
    }

    fn invariant_holds(flags: ChannelFlags) -> bool {
        !(flags.audio_foreground && flags.video_foreground && !flags.video_muted)
    }

    #[test]
    fn test_enforce_fixpoint_restores_invariant_from_any_state() {
        for role in [Role::Admin, Role::Listener] {
            let arbiter = ExclusivityArbiter::new(role);
            for flags in all_flag_combinations() {
                let (settled, _) = arbiter.enforce_fixpoint(flags);
                assert!(invariant_holds(settled), "violated from {flags:?}");
                // And the fixpoint is stable.
                let (again, actions) = arbiter.enforce(settled);
                assert_eq!(again, settled);
                assert!(actions.is_empty());
            }
        }
    }

    #[test]
    fn test_invariant_after_arbitrary_toggle_sequences() {
        let arbiter = ExclusivityArbiter::new(Role::Listener);
        for seed in 0..64_u32 {
            let mut flags = ChannelFlags::default();
            for step in 0..6 {
                let (next, _) = if (seed >> step) & 1 == 0 {
                    arbiter.audio_on(flags)
                } else {
                    arbiter.video_on(flags)
                };
                flags = next;
                assert!(invariant_holds(flags), "seed {seed} step {step}: {flags:?}");
            }
        }
    }

    #[test]
    fn test_audio_on_silences_video() {
        let arbiter = ExclusivityArbiter::new(Role::Listener);
        let (flags, actions) = arbiter.audio_on(ChannelFlags {
            audio_foreground: false,
            video_foreground: true,
            video_muted: false,
        });
        assert!(flags.audio_foreground);
        assert!(!flags.video_foreground);
        assert!(flags.video_muted);
        assert!(actions.contains(&ArbiterAction::MuteVideo));
    }

    #[test]
    fn test_audio_on_admin_publishes_tv_stop() {
        let arbiter = ExclusivityArbiter::new(Role::Admin);
        let (_, actions) = arbiter.audio_on(ChannelFlags {
            audio_foreground: false,
            video_foreground: true,
            video_muted: false,
        });
        assert!(actions.contains(&ArbiterAction::PublishTvStopped));
    }

    #[test]
    fn test_video_on_stops_audio() {
        let listener = ExclusivityArbiter::new(Role::Listener);
        let (flags, actions) = listener.video_on(ChannelFlags {
            audio_foreground: true,
            video_foreground: false,
            video_muted: true,
        });
        assert!(!flags.audio_foreground);
        assert!(flags.video_foreground);
        assert!(!flags.video_muted);
        assert!(actions.contains(&ArbiterAction::StopAudio));
        assert!(actions.contains(&ArbiterAction::UnmuteVideo));

        let admin = ExclusivityArbiter::new(Role::Admin);
        let (_, actions) = admin.video_on(ChannelFlags {
            audio_foreground: true,
            video_foreground: false,
            video_muted: true,
        });
        assert!(actions.contains(&ArbiterAction::PublishAudioStopped));
    }

    #[test]
    fn test_background_video_unmute_is_reverted() {
        // Audio on the air; the video unmute flag arrives out of order.
        let arbiter = ExclusivityArbiter::new(Role::Listener);
        let (flags, actions) = arbiter.enforce_fixpoint(ChannelFlags {
            audio_foreground: true,
            video_foreground: false,
            video_muted: false,
        });
        assert!(flags.video_muted);
        assert!(actions.contains(&ArbiterAction::MuteVideo));
    }

    #[test]
    fn test_unmuted_foreground_video_wins_over_audio() {
        let arbiter = ExclusivityArbiter::new(Role::Listener);
        let (flags, actions) = arbiter.enforce_fixpoint(ChannelFlags {
            audio_foreground: true,
            video_foreground: true,
            video_muted: false,
        });
        assert!(!flags.audio_foreground);
        assert!(flags.video_foreground);
        assert!(actions.contains(&ArbiterAction::StopAudio));
    }
}
