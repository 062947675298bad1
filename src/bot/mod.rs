//! # Bot Module
//!
//! Discord glue around the playback core.
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It owns the
//! [`SessionRegistry`] and builds each guild's session on first use, wiring a
//! songbird-backed transport, a channel notifier and the yt-dlp pipeline into
//! a fresh [`Player`].

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    http::Http,
};
use songbird::Songbird;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

use crate::{
    audio::{
        encoder::OpusFrameEncoder,
        player::{Player, PlayerDeps},
        session::{GuildSession, SessionRegistry},
        source::{SourceOpener, YtDlpPipeline},
        transport::SongbirdTransport,
    },
    config::Config,
    sources::{MetadataResolver, YtDlpResolver},
};

use self::notifier::ChannelNotifier;

pub struct MusicBot {
    pub config: Arc<Config>,
    pub sessions: SessionRegistry,
    pub resolver: Arc<dyn MetadataResolver>,
    sources: Arc<dyn SourceOpener>,
}

impl MusicBot {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone()));
        let sources = Arc::new(YtDlpPipeline::new(config.pipeline()));

        Self {
            config,
            sessions: SessionRegistry::new(),
            resolver,
            sources,
        }
    }

    /// Returns the guild's session, creating it on first use.
    ///
    /// Announcements go to `text_channel`, the channel of the command that
    /// created the session.
    pub async fn session(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        text_channel: ChannelId,
    ) -> Result<Arc<GuildSession>> {
        if let Some(session) = self.sessions.get(guild_id) {
            return Ok(session);
        }

        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird is not registered"))?;
        let http = ctx.http.clone();

        Ok(self.sessions.get_or_create(guild_id, || {
            self.build_session(manager, http, guild_id, text_channel)
        }))
    }

    fn build_session(
        &self,
        manager: Arc<Songbird>,
        http: Arc<Http>,
        guild_id: GuildId,
        text_channel: ChannelId,
    ) -> GuildSession {
        let transport = Arc::new(SongbirdTransport::new(
            manager,
            guild_id,
            self.config.opus_bitrate,
            self.config.frame_channel_capacity,
        ));
        let notifier = Arc::new(ChannelNotifier::new(http, text_channel));

        let deps = PlayerDeps {
            transport: transport.clone(),
            notifier: notifier.clone(),
            sources: self.sources.clone(),
            encoder: OpusFrameEncoder::boxed,
        };

        GuildSession {
            guild_id,
            player: Player::new(guild_id, deps, self.config.playback()),
            transport,
            notifier,
        }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registering guild commands: {:?}", e);
                        anyhow::anyhow!(
                            "Could not register guild commands. Check the bot has the 'applications.commands' scope in the guild."
                        )
                    })?;
                info!("✅ Guild commands registered for: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registering global commands: {:?}", e);
                    anyhow::anyhow!("Could not register global commands.")
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    /// Drops the guild's session when the bot is disconnected from voice by
    /// someone else.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id.or_else(|| old.and_then(|state| state.guild_id)) else {
            warn!("⚠️ Voice disconnect without a guild id");
            return;
        };

        if self.sessions.handle_disconnect(guild_id) {
            info!("🔌 Bot was disconnected in guild {}", guild_id);
        }
    }
}
