use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{queue::TrackQueue, session::GuildSession, track::Track},
    bot::MusicBot,
    error::PlayerError,
    sources,
    ui::embeds,
};

/// Dispatches a slash command.
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside of a server"))?;

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "playlist" => handle_playlist(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "showqueue" => handle_showqueue(ctx, &command, bot, guild_id).await?,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await?,
        _ => respond(ctx, &command, "❌ Unknown command").await?,
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("No query provided"))?
        .to_string();

    // Resolving can take a while
    defer(ctx, command).await?;

    let session = match join_caller(ctx, command, bot, guild_id).await {
        Ok(session) => session,
        Err(e) => return edit(ctx, command, &format!("❌ {}", e)).await,
    };

    let track = match sources::resolve_query(bot.resolver.as_ref(), &query).await {
        Ok(track) => track,
        Err(e) => {
            warn!("🔍 Could not resolve '{}': {}", query, e);
            return edit(ctx, command, &format!("❌ {}", e)).await;
        }
    };

    let started = session.player.add_track(track.clone());
    let message = if started {
        format!("🎵 Starting playback: **{}**", track.title)
    } else {
        format!("➕ Added to the queue: **{}**", track.title)
    };
    edit(ctx, command, &message).await
}

async fn handle_playlist(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let url = string_option(command, "url")
        .ok_or_else(|| anyhow::anyhow!("No playlist URL provided"))?
        .to_string();
    let total = playlist_total(int_option(command, "total"), bot.config.playlist_limit);
    let random = bool_option(command, "random").unwrap_or(false);

    if !sources::is_playlist_url(&url) {
        return respond(ctx, command, "❌ That is not a playlist URL.").await;
    }

    defer(ctx, command).await?;

    let session = match join_caller(ctx, command, bot, guild_id).await {
        Ok(session) => session,
        Err(e) => return edit(ctx, command, &format!("❌ {}", e)).await,
    };

    let tracks = match sources::resolve_playlist(bot.resolver.as_ref(), &url, total, random).await {
        Ok(tracks) => tracks,
        Err(e) => {
            warn!("📋 Could not load playlist {}: {}", url, e);
            return edit(ctx, command, &format!("❌ {}", e)).await;
        }
    };

    if tracks.is_empty() {
        return edit(ctx, command, "❌ No songs could be loaded from that playlist.").await;
    }

    let added = session.player.add_tracks(tracks);
    edit(ctx, command, &format!("📋 Added {} songs from the playlist.", added)).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let skipped = bot
        .sessions
        .get(guild_id)
        .map(|session| session.player.skip())
        .unwrap_or(false);

    respond(ctx, command, skip_message(skipped)).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Some(session) = bot.sessions.get(guild_id) {
        session.player.stop();
        if session.transport.is_connected() {
            session.transport.leave().await;
        }
    }

    let embed = embeds::info_embed("Stopped", "Stopped playback and cleared the queue.");
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn handle_showqueue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(session) = bot.sessions.get(guild_id) else {
        return respond(ctx, command, embeds::EMPTY_QUEUE).await;
    };

    let page = requested_page(int_option(command, "page"));
    match session.announce_queue(page, bot.config.queue_page_size).await {
        Ok(true) => respond(ctx, command, "📋 Here is the queue.").await,
        Ok(false) => respond(ctx, command, embeds::EMPTY_QUEUE).await,
        Err(e) => {
            warn!("⚠️ Could not send queue embed: {:?}", e);
            respond(ctx, command, "Something went wrong while trying to show the queue.").await
        }
    }
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(target) = remove_target(int_option(command, "position"), string_option(command, "query"))
    else {
        return respond(ctx, command, "❌ Give either a position or part of a title.").await;
    };

    let result = match bot.sessions.get(guild_id) {
        Some(session) => remove_from_queue(&session.player.queue(), target),
        None => remove_from_queue(&TrackQueue::new(), target),
    };

    match result {
        Ok(track) => {
            let embed = embeds::success_embed(
                "Removed",
                &format!("Removed **{}** from the queue.", track.title),
            );
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().embed(embed),
                    ),
                )
                .await?;
            Ok(())
        }
        Err(e) => {
            let embed = embeds::error_embed("Could not remove", &e.to_string());
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().embed(embed).ephemeral(true),
                    ),
                )
                .await?;
            Ok(())
        }
    }
}

/// Returns the caller's session, joining their voice channel first if needed.
async fn join_caller(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    guild_id: GuildId,
) -> Result<Arc<GuildSession>> {
    let voice_channel_id = get_user_voice_channel(ctx, guild_id, command.user.id)?;
    let session = bot.session(ctx, guild_id, command.channel_id).await?;

    // A drained queue may be leaving the channel right now.
    session.player.voice_settled().await;
    if !session.transport.is_connected() {
        session.transport.join(voice_channel_id).await?;
    }
    Ok(session)
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild not found in cache"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("You are not in a voice channel"))?;

    Ok(channel_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveTarget {
    Position(usize),
    Query(String),
}

/// A position wins over a query when both are given.
pub fn remove_target(position: Option<i64>, query: Option<&str>) -> Option<RemoveTarget> {
    if let Some(position) = position {
        return Some(RemoveTarget::Position(usize::try_from(position).unwrap_or(0)));
    }
    query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| RemoveTarget::Query(q.to_string()))
}

pub fn remove_from_queue(queue: &TrackQueue, target: RemoveTarget) -> Result<Track, PlayerError> {
    match target {
        RemoveTarget::Position(position) => queue.remove_at(position),
        RemoveTarget::Query(query) => queue.remove_matching(&query),
    }
}

pub fn skip_message(skipped: bool) -> &'static str {
    if skipped {
        "⏭️ Skipped the current song."
    } else {
        "Nothing to skip."
    }
}

/// Missing or non-positive pages show the first page.
pub fn requested_page(option: Option<i64>) -> usize {
    option
        .and_then(|page| usize::try_from(page).ok())
        .filter(|page| *page > 0)
        .unwrap_or(1)
}

pub fn playlist_total(option: Option<i64>, default: usize) -> usize {
    option
        .and_then(|total| usize::try_from(total).ok())
        .filter(|total| *total > 0)
        .unwrap_or(default)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}
