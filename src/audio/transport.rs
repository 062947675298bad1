use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use symphonia::core::{io::MediaSource, probe::Hint};
use tracing::{debug, info, warn};

use crate::{audio::dca::DcaStream, error::TransportError};

/// Real-time outbound channel to a guild's voice connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn join(&self, channel: ChannelId) -> Result<(), TransportError>;

    /// Gracefully disconnects. Never called on a transport that was torn down
    /// externally.
    async fn leave(&self);

    fn is_connected(&self) -> bool;

    /// Hands one encoded frame to the connection. May wait while the outbound
    /// buffer is full; callers bound the wait.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Consumes one pending disconnect caused by our own `leave`. Returns
    /// `false` when the disconnect came from outside.
    fn take_expected_disconnect(&self) -> bool {
        false
    }
}

/// [`Transport`] backed by a songbird call playing a live DCA stream.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    bitrate: u32,
    capacity: usize,
    connected: Arc<AtomicBool>,
    frames: Mutex<Option<flume::Sender<Bytes>>>,
    pending_leaves: AtomicUsize,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId, bitrate: u32, capacity: usize) -> Self {
        Self {
            manager,
            guild_id,
            bitrate,
            capacity: capacity.max(1),
            connected: Arc::new(AtomicBool::new(false)),
            frames: Mutex::new(None),
            pending_leaves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn join(&self, channel: ChannelId) -> Result<(), TransportError> {
        let call = self
            .manager
            .join(self.guild_id, channel)
            .await
            .map_err(|e| TransportError::Join(e.to_string()))?;

        let (tx, rx) = flume::bounded(self.capacity);
        let mut hint = Hint::new();
        hint.with_extension("dca");
        let stream = AudioStream {
            input: Box::new(DcaStream::new(rx, self.bitrate)) as Box<dyn MediaSource>,
            hint: Some(hint),
        };

        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            handler.stop();
            for (event, connected) in [
                (CoreEvent::DriverConnect, true),
                (CoreEvent::DriverReconnect, true),
                (CoreEvent::DriverDisconnect, false),
            ] {
                handler.add_global_event(
                    Event::Core(event),
                    ConnectionWatcher {
                        guild_id: self.guild_id,
                        flag: Arc::clone(&self.connected),
                        connected,
                    },
                );
            }
            handler.play_input(Input::Live(LiveInput::Raw(stream), None));
        }

        *self.frames.lock() = Some(tx);
        self.connected.store(true, Ordering::Release);
        info!("🔊 Connected to voice channel {} in guild {}", channel, self.guild_id);
        Ok(())
    }

    async fn leave(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            // Discord echoes our own leave as a voice state update.
            self.pending_leaves.fetch_add(1, Ordering::AcqRel);
        }
        self.frames.lock().take();

        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Could not leave voice channel in guild {}: {}", self.guild_id, e);
        } else {
            info!("👋 Left voice channel in guild {}", self.guild_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let sender = self
            .frames
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        sender
            .send_async(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    fn take_expected_disconnect(&self) -> bool {
        self.pending_leaves
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Mirrors songbird driver connection events into the liveness flag.
struct ConnectionWatcher {
    guild_id: GuildId,
    flag: Arc<AtomicBool>,
    connected: bool,
}

#[async_trait]
impl VoiceEventHandler for ConnectionWatcher {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!(
            "🔌 Voice driver in guild {} is now {}",
            self.guild_id,
            if self.connected { "connected" } else { "disconnected" }
        );
        self.flag.store(self.connected, Ordering::Release);
        None
    }
}
