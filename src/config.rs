use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{player::PlaybackConfig, source::PipelineConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // guild-scoped commands for development

    // External tools
    pub ytdlp_path: String,
    pub ffmpeg_path: String,

    // Streaming
    pub send_timeout_secs: u64,
    pub liveness_interval: u64,
    pub pcm_buffer_size: usize,
    pub opus_bitrate: u32,
    pub frame_channel_capacity: usize,
    pub stats_interval_secs: u64,
    pub fetch_startup_grace_ms: u64,

    // Commands
    pub playlist_limit: usize,
    pub queue_page_size: usize,

    // Behaviour
    pub leave_when_idle: bool,
    pub fragment_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, applying defaults for
    /// unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .context("DISCORD_TOKEN is not set")?,
            guild_id: match lookup("GUILD_ID") {
                Some(id) if !id.trim().is_empty() => {
                    Some(id.trim().parse().context("GUILD_ID must be a numeric id")?)
                }
                _ => None,
            },

            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ffmpeg_path: lookup("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),

            send_timeout_secs: parse_or(&lookup, "SEND_TIMEOUT_SECS", defaults.send_timeout_secs)?,
            liveness_interval: parse_or(&lookup, "LIVENESS_INTERVAL", defaults.liveness_interval)?,
            pcm_buffer_size: parse_or(&lookup, "PCM_BUFFER_SIZE", defaults.pcm_buffer_size)?,
            opus_bitrate: parse_or(&lookup, "OPUS_BITRATE", defaults.opus_bitrate)?,
            frame_channel_capacity: parse_or(
                &lookup,
                "FRAME_CHANNEL_CAPACITY",
                defaults.frame_channel_capacity,
            )?,
            stats_interval_secs: parse_or(
                &lookup,
                "STATS_INTERVAL_SECS",
                defaults.stats_interval_secs,
            )?,
            fetch_startup_grace_ms: parse_or(
                &lookup,
                "FETCH_STARTUP_GRACE_MS",
                defaults.fetch_startup_grace_ms,
            )?,

            playlist_limit: parse_or(&lookup, "PLAYLIST_LIMIT", defaults.playlist_limit)?,
            queue_page_size: parse_or(&lookup, "QUEUE_PAGE_SIZE", defaults.queue_page_size)?,

            leave_when_idle: parse_or(&lookup, "LEAVE_WHEN_IDLE", defaults.leave_when_idle)?,
            fragment_dir: lookup("FRAGMENT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.fragment_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Sanity checks that catch common mistakes before the bot connects.
    ///
    /// - Opus bitrate must be within 8kbps..=510kbps
    /// - Timeouts, intervals and sizes must be greater than 0
    /// - The PCM buffer must hold at least one frame
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.send_timeout_secs == 0 {
            anyhow::bail!("Send timeout must be greater than 0");
        }

        if self.liveness_interval == 0 {
            anyhow::bail!("Liveness interval must be greater than 0");
        }

        if self.pcm_buffer_size < crate::audio::encoder::FRAME_BYTES {
            anyhow::bail!(
                "PCM buffer must hold at least one frame ({} bytes), got: {}",
                crate::audio::encoder::FRAME_BYTES,
                self.pcm_buffer_size
            );
        }

        if self.frame_channel_capacity == 0 {
            anyhow::bail!("Frame channel capacity must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.playlist_limit == 0 {
            anyhow::bail!("Playlist limit must be greater than 0");
        }

        Ok(())
    }

    /// Settings for the streaming loop of every player.
    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            send_timeout: Duration::from_secs(self.send_timeout_secs),
            liveness_interval: self.liveness_interval,
            opus_bitrate: self.opus_bitrate,
            leave_when_idle: self.leave_when_idle,
            stats_interval: Duration::from_secs(self.stats_interval_secs.max(1)),
        }
    }

    /// Settings for the yt-dlp → ffmpeg pipeline.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            ytdlp_path: self.ytdlp_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            buffer_size: self.pcm_buffer_size,
            fragment_dir: self.fragment_dir.clone(),
            startup_grace: Duration::from_millis(self.fetch_startup_grace_ms),
        }
    }

    /// Summary for logging. Never includes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Tools: {} / {}\n  \
            Audio: {}kbps, {}KiB buffer, {} frame backlog\n  \
            Streaming: {}s send timeout, liveness every {} frames\n  \
            Commands: playlist limit {}, {} per queue page\n  \
            Leave when idle: {}",
            self.guild_id
                .map_or("global".to_string(), |id| format!("in guild {id}")),
            self.ytdlp_path,
            self.ffmpeg_path,
            self.opus_bitrate / 1000,
            self.pcm_buffer_size / 1024,
            self.frame_channel_capacity,
            self.send_timeout_secs,
            self.liveness_interval,
            self.playlist_limit,
            self.queue_page_size,
            self.leave_when_idle
        )
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {value}")),
        _ => Ok(default),
    }
}

/// Default configuration values, used for every unset key.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            guild_id: None,

            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),

            send_timeout_secs: 5,
            liveness_interval: 100,
            pcm_buffer_size: 64 * 1024,
            opus_bitrate: 96_000, // 96kbps (Discord default)
            frame_channel_capacity: 50, // ~1s of audio
            stats_interval_secs: 5,
            fetch_startup_grace_ms: 150,

            playlist_limit: 25,
            queue_page_size: 10,

            leave_when_idle: true,
            fragment_dir: PathBuf::from("."),
        }
    }
}
