use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use tracing::{error, info};

use beatgopher::{bot::MusicBot, config::Config, sources::ytdlp::verify_dependencies};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("beatgopher=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting beatgopher v{}", env!("CARGO_PKG_VERSION"));

    // The health check must work without a token
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    info!("{}", config.summary());

    if let Err(e) = verify_dependencies(&config.ytdlp_path, &config.ffmpeg_path).await {
        error!("❌ Missing external tools: {:?}", e);
        return Err(e);
    }

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let token = config.discord_token.clone();
    let mut client = Client::builder(&token, intents)
        .event_handler(MusicBot::new(config))
        .register_songbird()
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Shutdown signal received, closing...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Could not listen for Ctrl+C: {:?}", e),
        }
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();
    let ytdlp = std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path);
    let ffmpeg = std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path);

    verify_dependencies(&ytdlp, &ffmpeg).await?;
    println!("OK");
    Ok(())
}
