use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::{
    notifier::Notifier, player::Player, queue::QueuePage, transport::Transport,
};

/// Everything that lives for one guild's voice session.
pub struct GuildSession {
    pub guild_id: GuildId,
    pub player: Arc<Player>,
    pub transport: Arc<dyn Transport>,
    pub notifier: Arc<dyn Notifier>,
}

impl GuildSession {
    /// Announces one page of the queue. Returns `false` when the queue is empty
    /// and nothing was sent.
    pub async fn announce_queue(&self, page: usize, page_size: usize) -> anyhow::Result<bool> {
        let snapshot = self.player.queue().snapshot();
        if snapshot.is_empty() {
            return Ok(false);
        }

        let page = QueuePage::paginate(&snapshot, page, page_size);
        self.notifier.announce_queue(&page).await?;
        Ok(true)
    }
}

/// Process-wide map of active guild sessions.
///
/// Sessions are created lazily on the first command for a guild. The map's
/// shard lock is only held for the lookup or insertion itself, never while a
/// player is driven, so guilds never wait on each other.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the guild's session, building it with `create` if there is none.
    /// `create` runs under the shard lock and must not block.
    pub fn get_or_create<F>(&self, guild_id: GuildId, create: F) -> Arc<GuildSession>
    where
        F: FnOnce() -> GuildSession,
    {
        let entry = self.sessions.entry(guild_id).or_insert_with(|| {
            info!("🆕 New session for guild {}", guild_id);
            Arc::new(create())
        });
        Arc::clone(entry.value())
    }

    /// Tears down a session whose voice connection was closed from outside.
    ///
    /// The entry is removed and its player force-stopped, which releases any
    /// live audio source. The transport is not asked to leave: it is already
    /// gone. The echo of our own graceful leave is ignored. Returns whether a
    /// session was torn down.
    pub fn handle_disconnect(&self, guild_id: GuildId) -> bool {
        if let Some(session) = self.get(guild_id) {
            if session.transport.take_expected_disconnect() {
                debug!("👋 Ignoring our own voice leave in guild {}", guild_id);
                return false;
            }
        }

        match self.sessions.remove(&guild_id) {
            Some((_, session)) => {
                info!("🔌 Voice connection closed in guild {}, dropping session", guild_id);
                session.player.stop();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
