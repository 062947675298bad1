use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::process::Stdio;
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info, warn};

use super::MetadataResolver;
use crate::{
    audio::track::Track,
    error::{PlayerError, Result},
};

/// `--print` template; fields are split on `|` in this order.
pub const PRINT_FORMAT: &str =
    "%(id)s|%(channel)s|%(title)s|%(duration_string)s|%(webpage_url)s|%(thumbnail)s";

/// Concurrent yt-dlp metadata lookups.
const MAX_CONCURRENT_LOOKUPS: usize = 3;

/// [`MetadataResolver`] shelling out to yt-dlp.
pub struct YtDlpResolver {
    binary: String,
    rate_limiter: Semaphore,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(MAX_CONCURRENT_LOOKUPS),
        }
    }

    async fn print(&self, args: &[&str]) -> Result<String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| PlayerError::Resolution(e.to_string()))?;

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PlayerError::Resolution(format!("could not run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp failed ({}): {}", output.status, stderr.trim());
            return Err(PlayerError::Resolution(format!(
                "yt-dlp error: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl MetadataResolver for YtDlpResolver {
    async fn search(&self, query: &str) -> Result<Track> {
        let target = format!("ytsearch:{query}");
        let output = self
            .print(&[&target, "--print", PRINT_FORMAT, "--skip-download"])
            .await?;
        parse_track(&output)
    }

    async fn info(&self, url: &str) -> Result<Track> {
        debug!("📊 Fetching info for: {}", url);
        let output = self
            .print(&[url, "--print", PRINT_FORMAT, "--skip-download", "--no-playlist"])
            .await?;
        parse_track(&output)
    }

    async fn playlist(&self, url: &str, limit: usize, shuffle: bool) -> Result<Vec<Track>> {
        let output = self
            .print(&["--print", PRINT_FORMAT, "--flat-playlist", "--skip-download", url])
            .await?;

        let mut tracks = parse_playlist(&output);
        if shuffle {
            tracks.shuffle(&mut rand::thread_rng());
        }
        tracks.truncate(limit);

        info!("📋 Playlist {} resolved to {} tracks", url, tracks.len());
        Ok(tracks)
    }
}

/// Parses one `--print` line into a track.
pub fn parse_track(output: &str) -> Result<Track> {
    let line = output.trim();
    if line.is_empty() {
        return Err(PlayerError::Resolution("empty output from yt-dlp".into()));
    }

    let parts: Vec<&str> = line.splitn(6, '|').collect();
    let [id, channel, title, duration, url, thumbnail] = parts[..] else {
        return Err(PlayerError::Resolution(format!(
            "unexpected output format: {line}"
        )));
    };

    Ok(Track::new(id, title, channel, duration, url, thumbnail))
}

/// Parses playlist output line by line; lines that don't parse are skipped.
pub fn parse_playlist(output: &str) -> Vec<Track> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_track(line) {
            Ok(track) => Some(track),
            Err(e) => {
                warn!("⚠️ Skipping playlist entry: {}", e);
                None
            }
        })
        .collect()
}

/// Checks that yt-dlp and ffmpeg can be executed.
pub async fn verify_dependencies(ytdlp: &str, ffmpeg: &str) -> anyhow::Result<()> {
    for (binary, flag) in [(ytdlp, "--version"), (ffmpeg, "-version")] {
        let output = Command::new(binary)
            .arg(flag)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("{} is not available: {}", binary, e))?;
        if !output.status.success() {
            anyhow::bail!("{} exited with {}", binary, output.status);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        debug!("✅ {}: {}", binary, version.lines().next().unwrap_or_default());
    }
    Ok(())
}
