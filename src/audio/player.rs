//! # Player
//!
//! Per-guild playback state machine.
//!
//! A [`Player`] owns one [`TrackQueue`] and runs at most one playback loop at a
//! time. The loop dequeues a track, opens its [`AudioSource`], and streams 20ms
//! frames through the [`FrameEncoder`] into the guild's [`Transport`] until the
//! source ends, the track is skipped, the player is stopped or the transport
//! goes away.
//!
//! ## Lock discipline
//!
//! All mutable state sits behind one `parking_lot::Mutex` that is never held
//! across an `.await`. The `Idle → Playing` flip and the `Playing → Idle` flip on
//! an empty queue both happen inside that lock, together with the enqueue or
//! dequeue that caused them, so a track added while the loop is finishing is
//! never stranded. Every loop run carries a generation number; `stop()` bumps
//! it so a loop that is still unwinding can never touch the state of the next
//! run.
//!
//! ## Leaving on drain
//!
//! A drained loop goes Idle before it leaves the voice channel, holding the
//! voice lock for the duration of the leave. A loop started by a later add waits
//! on that lock, so it never streams into a connection that is going away.

use humantime::format_duration;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{io::AsyncReadExt, sync::OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        encoder::{decode_pcm_frame, EncoderFactory, FRAME_BYTES, FRAME_PCM_LEN},
        notifier::{Notifier, STATUS_PLAYING, STATUS_QUEUED},
        queue::TrackQueue,
        source::{AudioSource, SourceHandle, SourceOpener},
        track::Track,
        transport::Transport,
    },
    error::{PlayerError, TransportError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
}

/// Tuning for the frame streaming loop.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Upper bound for handing one frame to the transport.
    pub send_timeout: Duration,
    /// Frames between transport liveness polls.
    pub liveness_interval: u64,
    pub opus_bitrate: u32,
    /// Leave the voice channel once the queue drains.
    pub leave_when_idle: bool,
    /// How often stream statistics are logged while a track plays.
    pub stats_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            liveness_interval: 100,
            opus_bitrate: 96_000,
            leave_when_idle: true,
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// Collaborators a player streams through.
#[derive(Clone)]
pub struct PlayerDeps {
    pub transport: Arc<dyn Transport>,
    pub notifier: Arc<dyn Notifier>,
    pub sources: Arc<dyn SourceOpener>,
    pub encoder: EncoderFactory,
}

struct CurrentTrack {
    track: Track,
    skip: CancellationToken,
    source: Option<Arc<SourceHandle>>,
}

struct PlayerState {
    queue: Arc<TrackQueue>,
    status: PlayerStatus,
    generation: u64,
    session: CancellationToken,
    current: Option<CurrentTrack>,
}

pub struct Player {
    guild_id: GuildId,
    deps: PlayerDeps,
    config: PlaybackConfig,
    state: Mutex<PlayerState>,
    voice: Arc<tokio::sync::Mutex<()>>,
}

enum Step {
    Play(Track, CancellationToken),
    Leave(OwnedMutexGuard<()>),
    Done,
}

#[derive(Debug)]
enum StreamOutcome {
    Finished(StreamStats),
    Skipped,
    Stopped,
    Failed(PlayerError),
    TransportLost {
        error: TransportError,
        frames_sent: u64,
    },
}

#[derive(Debug)]
struct StreamStats {
    started: Instant,
    last_report: Instant,
    frames_read: u64,
    frames_sent: u64,
    timeouts: u64,
}

impl StreamStats {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_report: now,
            frames_read: 0,
            frames_sent: 0,
            timeouts: 0,
        }
    }

    fn elapsed(&self) -> String {
        format_duration(Duration::from_secs(self.started.elapsed().as_secs())).to_string()
    }

    fn report(&mut self, title: &str, every: Duration) {
        if self.last_report.elapsed() < every {
            return;
        }
        self.last_report = Instant::now();
        debug!(
            "📊 '{}': {} frames sent, {} timeouts, {} elapsed",
            title,
            self.frames_sent,
            self.timeouts,
            self.elapsed()
        );
    }
}

impl Player {
    pub fn new(guild_id: GuildId, deps: PlayerDeps, config: PlaybackConfig) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            deps,
            config,
            state: Mutex::new(PlayerState {
                queue: Arc::new(TrackQueue::new()),
                status: PlayerStatus::Idle,
                generation: 0,
                session: CancellationToken::new(),
                current: None,
            }),
            voice: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Queues a track and starts playback if the player is idle.
    ///
    /// Returns `true` when this call started the playback loop. Otherwise a
    /// "queued" announcement is sent for the track.
    pub fn add_track(self: &Arc<Self>, track: Track) -> bool {
        let mut state = self.state.lock();
        state.queue.enqueue(track.clone());

        if state.status == PlayerStatus::Idle {
            let (generation, session) = Self::begin(&mut state);
            drop(state);
            self.spawn_loop(generation, session);
            true
        } else {
            drop(state);
            info!("➕ Queued '{}' in guild {}", track.title, self.guild_id);
            self.notify(track, STATUS_QUEUED);
            false
        }
    }

    /// Queues tracks in order under one lock and starts playback if idle.
    ///
    /// Bulk adds are announced by the caller, so no per-track "queued"
    /// notifications are emitted. Returns the number of tracks queued.
    pub fn add_tracks(self: &Arc<Self>, tracks: Vec<Track>) -> usize {
        let mut state = self.state.lock();
        let added = state.queue.enqueue_all(tracks);

        if added > 0 && state.status == PlayerStatus::Idle {
            let (generation, session) = Self::begin(&mut state);
            drop(state);
            self.spawn_loop(generation, session);
        }
        added
    }

    /// Abandons the current track. Returns `false` when nothing is playing.
    pub fn skip(&self) -> bool {
        let state = self.state.lock();
        if state.status == PlayerStatus::Idle {
            return false;
        }

        if let Some(current) = &state.current {
            info!("⏭️ Skipping '{}' in guild {}", current.track.title, self.guild_id);
            current.skip.cancel();
        }
        true
    }

    /// Ends playback, releases the live source and discards every queued track.
    ///
    /// Idempotent. Never touches the voice connection; leaving is up to the
    /// caller.
    pub fn stop(&self) {
        let current = {
            let mut state = self.state.lock();
            let was_playing = state.status == PlayerStatus::Playing;

            state.queue = Arc::new(TrackQueue::new());
            state.status = PlayerStatus::Idle;
            state.generation += 1;
            state.session.cancel();

            if was_playing {
                info!("⏹️ Playback stopped in guild {}", self.guild_id);
            }
            state.current.take()
        };

        if let Some(current) = current {
            current.skip.cancel();
            if let Some(source) = current.source {
                source.release();
            }
        }
    }

    pub fn status(&self) -> PlayerStatus {
        self.state.lock().status
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlayerStatus::Playing
    }

    pub fn now_playing(&self) -> Option<Track> {
        let state = self.state.lock();
        state.current.as_ref().map(|current| current.track.clone())
    }

    /// The current queue. `stop()` replaces it, so don't hold on to it.
    pub fn queue(&self) -> Arc<TrackQueue> {
        Arc::clone(&self.state.lock().queue)
    }

    /// Waits until a leave started by a drained queue has finished.
    pub async fn voice_settled(&self) {
        drop(self.voice.lock().await);
    }

    fn begin(state: &mut PlayerState) -> (u64, CancellationToken) {
        state.generation += 1;
        state.status = PlayerStatus::Playing;
        state.session = CancellationToken::new();
        (state.generation, state.session.clone())
    }

    fn spawn_loop(self: &Arc<Self>, generation: u64, session: CancellationToken) {
        let player = Arc::clone(self);
        tokio::spawn(async move { player.run(generation, session).await });
    }

    fn notify(&self, track: Track, status: &'static str) {
        let notifier = Arc::clone(&self.deps.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.announce(&track, status).await {
                warn!("⚠️ Could not announce '{}': {:?}", track.title, e);
            }
        });
    }

    async fn run(self: Arc<Self>, generation: u64, session: CancellationToken) {
        self.voice_settled().await;
        info!("▶️ Playback loop started in guild {}", self.guild_id);

        loop {
            let step = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return;
                }

                if !state.queue.is_empty() && !self.deps.transport.is_connected() {
                    state.status = PlayerStatus::Idle;
                    state.generation += 1;
                    state.current = None;
                    warn!(
                        "🔌 Not connected in guild {}, keeping {} tracks",
                        self.guild_id,
                        state.queue.len()
                    );
                    return;
                }

                match state.queue.dequeue() {
                    Some(track) => {
                        let skip = CancellationToken::new();
                        state.current = Some(CurrentTrack {
                            track: track.clone(),
                            skip: skip.clone(),
                            source: None,
                        });
                        Step::Play(track, skip)
                    }
                    None => {
                        state.status = PlayerStatus::Idle;
                        state.current = None;
                        info!("📭 Queue finished in guild {}", self.guild_id);

                        if self.config.leave_when_idle && self.deps.transport.is_connected() {
                            // Claimed under the state lock so a new loop cannot slip in first.
                            match Arc::clone(&self.voice).try_lock_owned() {
                                Ok(guard) => Step::Leave(guard),
                                Err(_) => Step::Done,
                            }
                        } else {
                            Step::Done
                        }
                    }
                }
            };

            match step {
                Step::Play(track, skip) => {
                    if !self.play_track(generation, &session, track, skip).await {
                        return;
                    }
                }
                Step::Leave(_guard) => {
                    self.deps.transport.leave().await;
                    return;
                }
                Step::Done => return,
            }

            let mut state = self.state.lock();
            if state.generation == generation {
                state.current = None;
            }
        }
    }

    /// Plays one track. Returns whether the loop should move on to the next one.
    async fn play_track(
        &self,
        generation: u64,
        session: &CancellationToken,
        track: Track,
        skip: CancellationToken,
    ) -> bool {
        info!("🎵 Now playing in guild {}: {}", self.guild_id, track);
        self.notify(track.clone(), STATUS_PLAYING);

        let mut source = match self.deps.sources.open(&track).await {
            Ok(source) => source,
            Err(e) => {
                warn!("⚠️ Skipping '{}': {}", track.title, e);
                return true;
            }
        };

        if !self.attach_source(generation, &source) {
            source.cleanup();
            return false;
        }

        let outcome = self.stream(&mut source, &track, session, &skip).await;
        source.cleanup();

        match outcome {
            StreamOutcome::Finished(stats) => {
                info!(
                    "✅ Finished '{}' after {} frames ({} timeouts, {})",
                    track.title,
                    stats.frames_sent,
                    stats.timeouts,
                    stats.elapsed()
                );
                true
            }
            StreamOutcome::Skipped => {
                debug!("⏭️ '{}' abandoned", track.title);
                true
            }
            StreamOutcome::Failed(e) => {
                warn!("❌ Playback of '{}' failed: {}", track.title, e);
                true
            }
            StreamOutcome::Stopped => false,
            StreamOutcome::TransportLost { error, frames_sent } => {
                warn!(
                    "🔌 Transport lost in guild {} while playing '{}': {}",
                    self.guild_id, track.title, error
                );
                // Nothing was heard yet, so the track goes back to the front.
                let requeue = (frames_sent == 0).then_some(track);
                self.transport_lost(generation, requeue);
                false
            }
        }
    }

    /// Publishes the source handle so `stop()` can release it. Returns `false`
    /// if the player was stopped while the source was opening.
    fn attach_source(&self, generation: u64, source: &AudioSource) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        if let Some(current) = state.current.as_mut() {
            current.source = Some(source.handle());
        }
        true
    }

    fn transport_lost(&self, generation: u64, requeue: Option<Track>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(track) = requeue {
            state.queue.requeue_front(track);
        }
        state.status = PlayerStatus::Idle;
        state.generation += 1;
        state.current = None;
        info!(
            "💤 Player idle in guild {} with {} tracks kept",
            self.guild_id,
            state.queue.len()
        );
    }

    async fn stream(
        &self,
        source: &mut AudioSource,
        track: &Track,
        stop: &CancellationToken,
        skip: &CancellationToken,
    ) -> StreamOutcome {
        let mut encoder = match (self.deps.encoder)(self.config.opus_bitrate) {
            Ok(encoder) => encoder,
            Err(e) => return StreamOutcome::Failed(e),
        };
        let transport = &self.deps.transport;
        let liveness_interval = self.config.liveness_interval.max(1);

        let mut raw = vec![0u8; FRAME_BYTES];
        let mut pcm = vec![0i16; FRAME_PCM_LEN];
        let mut stats = StreamStats::new();

        loop {
            if stop.is_cancelled() {
                return StreamOutcome::Stopped;
            }
            if skip.is_cancelled() {
                return StreamOutcome::Skipped;
            }

            let read = tokio::select! {
                biased;
                _ = stop.cancelled() => return StreamOutcome::Stopped,
                _ = skip.cancelled() => return StreamOutcome::Skipped,
                read = source.reader().read_exact(&mut raw) => read,
            };
            match read {
                Ok(_) => stats.frames_read += 1,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if stats.frames_read == 0 {
                        return StreamOutcome::Failed(PlayerError::AudioSource(
                            "stream produced no audio".into(),
                        ));
                    }
                    return StreamOutcome::Finished(stats);
                }
                Err(e) => return StreamOutcome::Failed(PlayerError::AudioSource(e.to_string())),
            }

            decode_pcm_frame(&raw, &mut pcm);
            let packet = match encoder.encode(&pcm) {
                Ok(packet) => packet,
                Err(e) => return StreamOutcome::Failed(e),
            };

            let sent = tokio::select! {
                biased;
                _ = stop.cancelled() => return StreamOutcome::Stopped,
                _ = skip.cancelled() => return StreamOutcome::Skipped,
                sent = tokio::time::timeout(self.config.send_timeout, transport.send(packet)) => sent,
            };
            match sent {
                Ok(Ok(())) => stats.frames_sent += 1,
                Ok(Err(error)) if error.is_disconnect() => {
                    return StreamOutcome::TransportLost {
                        error,
                        frames_sent: stats.frames_sent,
                    }
                }
                Ok(Err(e)) => return StreamOutcome::Failed(e.into()),
                Err(_) => {
                    stats.timeouts += 1;
                    if !transport.is_connected() {
                        return StreamOutcome::TransportLost {
                            error: TransportError::Disconnected,
                            frames_sent: stats.frames_sent,
                        };
                    }
                    warn!(
                        "⏱️ Timed out sending frame {} of '{}', dropping it",
                        stats.frames_read, track.title
                    );
                    continue;
                }
            }

            if stats.frames_read % liveness_interval == 0 && !transport.is_connected() {
                return StreamOutcome::TransportLost {
                    error: TransportError::Disconnected,
                    frames_sent: stats.frames_sent,
                };
            }
            stats.report(&track.title, self.config.stats_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{
        eventually, failing_encoder, test_config, test_player, track, FailingNotifier,
        MockTransport, RecordingNotifier, Script, ScriptedSources,
    };
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn plays_a_track_to_the_end_and_goes_idle() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().with("x", Script::Frames(20));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        assert!(player.add_track(track("x")));
        assert!(player.is_playing());

        eventually("player to go idle", || !player.is_playing()).await;
        assert_eq!(transport.frames_sent(), 20);
        assert!(player.queue().is_empty());
        assert_eq!(player.now_playing(), None);
        assert!(sources.handle(0).is_released());

        eventually("announcement", || !notifier.events().is_empty()).await;
        assert_eq!(notifier.events(), vec![("x".to_string(), STATUS_PLAYING.to_string())]);
    }

    #[tokio::test]
    async fn second_track_is_queued_while_first_plays() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new()
            .with("x", Script::Endless)
            .with("y", Script::Frames(3));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        assert!(player.add_track(track("x")));
        assert!(!player.add_track(track("y")));
        assert_eq!(player.queue().snapshot(), vec![track("y")]);

        eventually("queued announcement", || notifier.has("y", STATUS_QUEUED)).await;
        eventually("x to start", || sources.opened() == vec!["x"]).await;
        assert!(!notifier.has("y", STATUS_PLAYING));

        assert!(player.skip());
        eventually("player to go idle", || !player.is_playing()).await;
        assert_eq!(sources.opened(), vec!["x", "y"]);
        assert!(notifier.has("y", STATUS_PLAYING));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_start_exactly_one_loop() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().default_script(Script::Endless);
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        let adds: Vec<_> = (0..16)
            .map(|i| {
                let player = Arc::clone(&player);
                tokio::spawn(async move { player.add_track(track(&format!("t{i}"))) })
            })
            .collect();
        let mut started = 0;
        for add in adds {
            if add.await.unwrap() {
                started += 1;
            }
        }

        assert_eq!(started, 1);
        eventually("first track to open", || sources.opened().len() == 1).await;
        assert_eq!(player.queue().len(), 15);
        eventually("queued announcements", || notifier.count(STATUS_QUEUED) == 15).await;

        player.stop();
    }

    #[tokio::test]
    async fn skip_is_false_when_idle() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new();
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        assert!(!player.skip());
        assert_eq!(player.status(), PlayerStatus::Idle);
    }

    #[tokio::test]
    async fn skip_releases_current_source_and_continues() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new()
            .with("x", Script::Endless)
            .with("y", Script::Endless);
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_tracks(vec![track("x"), track("y")]);
        eventually("x to stream", || transport.frames_sent() > 0).await;

        assert!(player.skip());
        eventually("x to be released", || sources.handle(0).is_released()).await;
        eventually("y to start", || sources.opened() == vec!["x", "y"]).await;
        assert!(player.is_playing());
        assert_eq!(player.now_playing(), Some(track("y")));

        player.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_once() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().default_script(Script::Endless);
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_tracks(vec![track("a"), track("b"), track("c")]);
        eventually("a to stream", || transport.frames_sent() > 0).await;
        let old_queue = player.queue();

        player.stop();
        assert_eq!(player.status(), PlayerStatus::Idle);
        assert!(player.queue().is_empty());
        assert!(!Arc::ptr_eq(&old_queue, &player.queue()));
        assert!(sources.handle(0).is_released());
        assert!(!sources.handle(0).release(), "source must only be released once");

        player.stop();
        assert_eq!(player.status(), PlayerStatus::Idle);

        let frames = transport.frames_sent();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.frames_sent() <= frames + 1);
        assert_eq!(sources.opened(), vec!["a"]);
        assert_eq!(transport.leave_count(), 0);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new();
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.stop();
        player.stop();
        assert!(!player.is_playing());
        assert!(player.queue().is_empty());
    }

    #[tokio::test]
    async fn silent_disconnect_is_detected_by_liveness_poll() {
        let transport = MockTransport::connected();
        transport.disconnect_after(12);
        let sources = ScriptedSources::new()
            .with("x", Script::Endless)
            .with("y", Script::Frames(2));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_tracks(vec![track("x"), track("y")]);
        eventually("player to go idle", || !player.is_playing()).await;

        // liveness_interval is 5 in the test config
        assert!(transport.frames_sent() <= 12 + 5, "sent {}", transport.frames_sent());
        assert_eq!(sources.opened(), vec!["x"]);
        assert_eq!(player.queue().snapshot(), vec![track("y")]);
        assert!(sources.handle(0).is_released());
        assert_eq!(transport.leave_count(), 0);

        // A new request resumes with what was left behind.
        transport.reconnect();
        assert!(player.add_track(track("z")));
        eventually("queue to drain", || !player.is_playing()).await;
        assert_eq!(sources.opened(), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn stalled_sends_are_dropped_and_streaming_recovers() {
        let transport = MockTransport::connected();
        transport.set_stalled(true);
        let sources = ScriptedSources::new().with("x", Script::Frames(10));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_track(track("x"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        transport.set_stalled(false);

        eventually("player to go idle", || !player.is_playing()).await;
        let sent = transport.frames_sent();
        assert!(sent > 0 && sent < 10, "sent {sent}");
    }

    #[tokio::test]
    async fn stalled_send_on_dead_transport_ends_playback() {
        let transport = MockTransport::connected();
        transport.set_stalled(true);
        let sources = ScriptedSources::new()
            .with("x", Script::Endless)
            .with("y", Script::Endless);
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_tracks(vec![track("x"), track("y")]);
        eventually("x to open", || sources.opened().len() == 1).await;
        transport.drop_connection();

        eventually("player to go idle", || !player.is_playing()).await;
        assert_eq!(sources.opened(), vec!["x"]);
        // x never reached the listener, so it is back at the front.
        assert_eq!(player.queue().snapshot(), vec![track("x"), track("y")]);
        assert!(sources.handle(0).is_released());
    }

    #[tokio::test]
    async fn failed_open_skips_to_next_track() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new()
            .with("x", Script::Fail(PlayerError::Resolution("video unavailable".into())))
            .with("y", Script::Frames(4));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_tracks(vec![track("x"), track("y")]);
        eventually("player to go idle", || !player.is_playing()).await;

        assert_eq!(sources.opened(), vec!["x", "y"]);
        assert_eq!(transport.frames_sent(), 4);
        eventually("announcements", || notifier.count(STATUS_PLAYING) == 2).await;
    }

    #[tokio::test]
    async fn empty_source_is_skipped() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new()
            .with("x", Script::Frames(0))
            .with("y", Script::Frames(2));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_tracks(vec![track("x"), track("y")]);
        eventually("player to go idle", || !player.is_playing()).await;
        assert_eq!(transport.frames_sent(), 2);
    }

    #[tokio::test]
    async fn encoder_failure_aborts_track_but_not_loop() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().default_script(Script::Frames(3));
        let notifier = RecordingNotifier::new();
        let mut deps = test_player(&transport, &sources, &notifier).deps.clone();
        deps.encoder = failing_encoder;
        let player = Player::new(GuildId::new(1), deps, PlaybackConfig {
            leave_when_idle: false,
            ..PlaybackConfig::default()
        });

        player.add_tracks(vec![track("a"), track("b")]);
        eventually("player to go idle", || !player.is_playing()).await;

        assert_eq!(sources.opened(), vec!["a", "b"]);
        assert_eq!(transport.frames_sent(), 0);
        assert!(sources.handle(0).is_released());
        assert!(sources.handle(1).is_released());
    }

    #[tokio::test]
    async fn bulk_add_preserves_order_without_queued_notifications() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().default_script(Script::Frames(1));
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        assert_eq!(player.add_tracks(vec![track("1"), track("2"), track("3")]), 3);
        eventually("player to go idle", || !player.is_playing()).await;

        assert_eq!(sources.opened(), vec!["1", "2", "3"]);
        eventually("announcements", || notifier.count(STATUS_PLAYING) == 3).await;
        assert_eq!(notifier.count(STATUS_QUEUED), 0);
    }

    #[tokio::test]
    async fn bulk_add_of_nothing_stays_idle() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new();
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        assert_eq!(player.add_tracks(Vec::new()), 0);
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn drained_queue_leaves_voice_when_configured() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().default_script(Script::Frames(2));
        let notifier = RecordingNotifier::new();
        let deps = test_player(&transport, &sources, &notifier).deps.clone();
        let player = Player::new(GuildId::new(1), deps, PlaybackConfig {
            leave_when_idle: true,
            liveness_interval: 5,
            ..PlaybackConfig::default()
        });

        player.add_track(track("x"));
        eventually("player to go idle", || !player.is_playing()).await;
        eventually("voice to be left", || !transport.is_connected()).await;
        player.voice_settled().await;
        assert_eq!(transport.leave_count(), 1);
        assert!(transport.take_expected_disconnect(), "the leave echo is expected");
    }

    #[tokio::test]
    async fn track_added_while_leaving_is_kept_for_the_next_join() {
        let transport = MockTransport::connected();
        transport.slow_leave(Duration::from_millis(200));
        let sources = ScriptedSources::new().default_script(Script::Frames(2));
        let notifier = RecordingNotifier::new();
        let deps = test_player(&transport, &sources, &notifier).deps.clone();
        let player = Player::new(GuildId::new(1), deps, PlaybackConfig {
            leave_when_idle: true,
            ..test_config()
        });

        player.add_track(track("x"));
        eventually("leave to begin", || transport.leave_count() == 1).await;
        assert!(!player.is_playing());

        // The new loop waits for the leave instead of streaming into it.
        assert!(player.add_track(track("y")));
        eventually("leave to finish", || !transport.is_connected()).await;
        eventually("player to go idle", || !player.is_playing()).await;

        assert_eq!(sources.opened(), vec!["x"]);
        assert_eq!(player.queue().snapshot(), vec![track("y")]);
        assert_eq!(transport.frames_sent(), 2);
        assert!(!notifier.has("y", STATUS_PLAYING));

        // Rejoining resumes with the kept track.
        transport.join(serenity::model::id::ChannelId::new(3)).await.unwrap();
        assert!(player.add_track(track("z")));
        eventually("y and z to play", || sources.opened() == vec!["x", "y", "z"]).await;
        eventually("player to go idle", || !player.is_playing()).await;
        assert_eq!(transport.frames_sent(), 6);
    }

    #[tokio::test]
    async fn stop_during_open_releases_the_late_source() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().with(
            "x",
            Script::Delayed(Duration::from_millis(100), Box::new(Script::Endless)),
        );
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_track(track("x"));
        eventually("x to be opening", || sources.opened() == vec!["x"]).await;
        player.stop();

        eventually("late source to be released", || {
            sources.handle_for("x").is_some_and(|handle| handle.is_released())
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.frames_sent(), 0);
        assert!(!player.is_playing());
        assert_eq!(player.now_playing(), None);
    }

    #[tokio::test]
    async fn stop_then_add_leaves_only_the_new_loop_running() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new()
            .with(
                "x",
                Script::Delayed(Duration::from_millis(100), Box::new(Script::Endless)),
            )
            .with("y", Script::Endless);
        let notifier = RecordingNotifier::new();
        let player = test_player(&transport, &sources, &notifier);

        player.add_track(track("x"));
        eventually("x to be opening", || sources.opened() == vec!["x"]).await;
        player.stop();
        assert!(player.add_track(track("y")));

        eventually("late x to be released", || {
            sources.handle_for("x").is_some_and(|handle| handle.is_released())
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(sources.opened(), vec!["x", "y"]);
        assert!(player.is_playing());
        assert_eq!(player.now_playing(), Some(track("y")));
        let y = sources.handle_for("y").expect("y was opened");
        assert!(!y.is_released());

        player.stop();
        assert!(y.is_released());
    }

    #[tokio::test]
    async fn failing_notifier_does_not_interrupt_playback() {
        let transport = MockTransport::connected();
        let sources = ScriptedSources::new().default_script(Script::Frames(3));
        let notifier = RecordingNotifier::new();
        let mut deps = test_player(&transport, &sources, &notifier).deps.clone();
        deps.notifier = Arc::new(FailingNotifier);
        let player = Player::new(GuildId::new(1), deps, test_config());

        player.add_tracks(vec![track("a"), track("b")]);
        assert!(!player.add_track(track("c")), "c takes the queued branch");

        eventually("queue to drain", || !player.is_playing()).await;
        assert_eq!(sources.opened(), vec!["a", "b", "c"]);
        assert_eq!(transport.frames_sent(), 9);
    }
}
