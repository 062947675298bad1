use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        playlist_command(),
        skip_command(),
        stop_command(),
        showqueue_command(),
        remove_command(),
    ]
}

/// Registers the commands globally.
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers the commands for a single guild (development).
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Plays a song from a URL or a search query.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL or search terms",
            )
            .required(true),
        )
}

fn playlist_command() -> CreateCommand {
    CreateCommand::new("playlist")
        .description("Queues the songs of a playlist.")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "Playlist URL")
                .required(true),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "total",
                "How many songs to queue",
            )
            .min_int_value(1)
            .required(false),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Boolean,
                "random",
                "Pick the songs in random order",
            )
            .required(false),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skips the current song.")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop")
        .description("Stops playback, clears the queue and leaves the voice channel.")
}

fn showqueue_command() -> CreateCommand {
    CreateCommand::new("showqueue")
        .description("Shows the current song queue.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "page",
                "The page of the queue to view.",
            )
            .min_int_value(1)
            .required(false),
        )
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Removes a song from the queue by position or title.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "position",
                "Position in the queue, starting at 1",
            )
            .min_int_value(1)
            .required(false),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "Part of the song title",
            )
            .required(false),
        )
}
