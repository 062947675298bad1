//! Test doubles for the playback core.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::io::AsyncReadExt;

use crate::{
    audio::{
        encoder::{FrameEncoder, FRAME_BYTES},
        notifier::Notifier,
        player::{PlaybackConfig, Player, PlayerDeps},
        queue::QueuePage,
        source::{AudioSource, SourceHandle, SourceOpener},
        track::Track,
        transport::Transport,
    },
    error::{PlayerError, Result, TransportError},
};

pub fn track(id: &str) -> Track {
    Track::new(
        id,
        format!("Song {id}"),
        "Test Channel",
        "3:00",
        format!("https://www.youtube.com/watch?v={id}"),
        "NA",
    )
}

/// Polls `condition` for up to five seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Player wired to the given doubles with short timeouts.
pub fn test_player(
    transport: &Arc<MockTransport>,
    sources: &Arc<ScriptedSources>,
    notifier: &Arc<RecordingNotifier>,
) -> Arc<Player> {
    let deps = PlayerDeps {
        transport: transport.clone(),
        notifier: notifier.clone(),
        sources: sources.clone(),
        encoder: passthrough_encoder,
    };
    Player::new(GuildId::new(1), deps, test_config())
}

pub fn test_config() -> PlaybackConfig {
    PlaybackConfig {
        send_timeout: Duration::from_millis(30),
        liveness_interval: 5,
        opus_bitrate: 64_000,
        leave_when_idle: false,
        stats_interval: Duration::from_secs(60),
    }
}

/// Transport that accepts every frame instantly unless stalled.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    stalled: AtomicBool,
    frames: AtomicUsize,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    pending_leaves: AtomicUsize,
    leave_delay: Mutex<Option<Duration>>,
    disconnect_after: Mutex<Option<usize>>,
}

impl MockTransport {
    pub fn connected() -> Arc<Self> {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames_sent(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    /// Connection goes away without `send` reporting it.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Silently drops the connection once `frames` frames were accepted.
    pub fn disconnect_after(&self, frames: usize) {
        *self.disconnect_after.lock() = Some(frames);
    }

    pub fn reconnect(&self) {
        *self.disconnect_after.lock() = None;
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Makes `leave` take `delay` before the connection is gone.
    pub fn slow_leave(&self, delay: Duration) {
        *self.leave_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn join(&self, _channel: ChannelId) -> std::result::Result<(), TransportError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn leave(&self) {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        let delay = *self.leave_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            self.pending_leaves.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, _frame: Bytes) -> std::result::Result<(), TransportError> {
        while self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Keeps endless sources from starving the test task.
        tokio::task::yield_now().await;

        let sent = self.frames.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.disconnect_after.lock() == Some(sent) {
            self.connected.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn take_expected_disconnect(&self) -> bool {
        self.pending_leaves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A queue page as the notifier received it.
#[derive(Debug, Clone)]
pub struct AnnouncedPage {
    pub ids: Vec<String>,
    pub first_position: usize,
    pub page: usize,
    pub total_pages: usize,
}

/// Records every announcement as `(track id, status)`.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, String)>>,
    queues: Mutex<Vec<AnnouncedPage>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().clone()
    }

    pub fn has(&self, id: &str, status: &str) -> bool {
        self.events.lock().iter().any(|(i, s)| i == id && s == status)
    }

    pub fn count(&self, status: &str) -> usize {
        self.events.lock().iter().filter(|(_, s)| s == status).count()
    }

    pub fn queues(&self) -> Vec<AnnouncedPage> {
        self.queues.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn announce(&self, track: &Track, status: &str) -> anyhow::Result<()> {
        self.events.lock().push((track.id.clone(), status.to_string()));
        Ok(())
    }

    async fn announce_queue(&self, page: &QueuePage) -> anyhow::Result<()> {
        self.queues.lock().push(AnnouncedPage {
            ids: page.items.iter().map(|t| t.id.clone()).collect(),
            first_position: page.first_position,
            page: page.current_page,
            total_pages: page.total_pages,
        });
        Ok(())
    }
}

/// Notifier whose every call fails, as when the text channel is gone.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn announce(&self, _track: &Track, _status: &str) -> anyhow::Result<()> {
        anyhow::bail!("missing access")
    }

    async fn announce_queue(&self, _page: &QueuePage) -> anyhow::Result<()> {
        anyhow::bail!("missing access")
    }
}

/// What a scripted source does once opened.
#[derive(Clone)]
pub enum Script {
    /// `n` frames of silence, then end of stream.
    Frames(usize),
    /// Silence until released.
    Endless,
    Fail(PlayerError),
    /// Opening takes this long, then behaves like the inner script.
    Delayed(Duration, Box<Script>),
}

/// [`SourceOpener`] that plays scripted silence keyed by track id.
pub struct ScriptedSources {
    scripts: Mutex<HashMap<String, Script>>,
    fallback: Mutex<Script>,
    opened: Mutex<Vec<String>>,
    handles: Mutex<Vec<Arc<SourceHandle>>>,
}

impl ScriptedSources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Script::Frames(3)),
            opened: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn with(self: Arc<Self>, id: &str, script: Script) -> Arc<Self> {
        self.scripts.lock().insert(id.to_string(), script);
        self
    }

    pub fn default_script(self: Arc<Self>, script: Script) -> Arc<Self> {
        *self.fallback.lock() = script;
        self
    }

    /// Track ids in the order they were opened.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Release handle of the `index`-th successfully opened source.
    pub fn handle(&self, index: usize) -> Arc<SourceHandle> {
        Arc::clone(&self.handles.lock()[index])
    }

    /// Release handle of the source opened for track `id`, once it exists.
    pub fn handle_for(&self, id: &str) -> Option<Arc<SourceHandle>> {
        let label = track(id).title;
        self.handles
            .lock()
            .iter()
            .find(|handle| handle.label() == label)
            .cloned()
    }
}

#[async_trait]
impl SourceOpener for ScriptedSources {
    async fn open(&self, track: &Track) -> Result<AudioSource> {
        self.opened.lock().push(track.id.clone());
        let mut script = self
            .scripts
            .lock()
            .get(&track.id)
            .cloned()
            .unwrap_or_else(|| self.fallback.lock().clone());
        while let Script::Delayed(delay, inner) = script {
            tokio::time::sleep(delay).await;
            script = *inner;
        }

        let source = match script {
            Script::Frames(n) => AudioSource::from_reader(
                &track.title,
                tokio::io::repeat(0).take((n * FRAME_BYTES) as u64),
            ),
            Script::Endless => AudioSource::from_reader(&track.title, tokio::io::repeat(0)),
            Script::Fail(e) => return Err(e),
            Script::Delayed(..) => unreachable!("delays are unwrapped above"),
        };
        self.handles.lock().push(source.handle());
        Ok(source)
    }
}

struct PassthroughEncoder;

impl FrameEncoder for PassthroughEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes> {
        Ok(Bytes::from(vec![pcm.len() as u8]))
    }
}

pub fn passthrough_encoder(_bitrate: u32) -> Result<Box<dyn FrameEncoder>> {
    Ok(Box::new(PassthroughEncoder))
}

pub fn failing_encoder(_bitrate: u32) -> Result<Box<dyn FrameEncoder>> {
    Err(PlayerError::Encode("codec unavailable".into()))
}
