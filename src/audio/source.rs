//! Fetch → transcode pipeline producing raw PCM for one track.
//!
//! An [`AudioSource`] owns two child processes (yt-dlp piped into ffmpeg) and a
//! producer task that moves ffmpeg's output into a buffered in-memory stream.
//! The processes are released through a shared [`SourceHandle`], so the player
//! can tear a source down from `stop()` while the playback loop still holds the
//! reader. Release is idempotent and never blocks: processes are killed
//! immediately and reaped on a background task.

use async_trait::async_trait;
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    audio::track::Track,
    error::{PlayerError, Result},
};

/// Opens the audio pipeline for a track.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, track: &Track) -> Result<AudioSource>;
}

/// Settings for the yt-dlp → ffmpeg pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    /// Bytes buffered between the transcode stage and the frame loop.
    pub buffer_size: usize,
    /// Working directory of the fetch stage; stray fragments are swept here.
    pub fragment_dir: PathBuf,
    /// How long to watch the fetch stage for an immediate failure.
    pub startup_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            buffer_size: 64 * 1024,
            fragment_dir: PathBuf::from("."),
            startup_grace: Duration::from_millis(150),
        }
    }
}

/// [`SourceOpener`] spawning yt-dlp and ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct YtDlpPipeline {
    config: PipelineConfig,
}

impl YtDlpPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceOpener for YtDlpPipeline {
    async fn open(&self, track: &Track) -> Result<AudioSource> {
        AudioSource::spawn(track, &self.config).await
    }
}

type PcmReader = Box<dyn AsyncRead + Send + Unpin>;

/// Live PCM stream for one track: 48kHz, s16le, 2 channels, interleaved.
pub struct AudioSource {
    reader: PcmReader,
    handle: Arc<SourceHandle>,
}

impl AudioSource {
    /// Starts the fetch and transcode stages for `track`.
    ///
    /// Fails with [`PlayerError::Resolution`] when the fetch stage cannot be
    /// started or exits with an error during the startup grace period, and with
    /// [`PlayerError::AudioSource`] when the transcode stage cannot be started.
    pub async fn spawn(track: &Track, config: &PipelineConfig) -> Result<Self> {
        info!("🎵 Opening audio pipeline for: {}", track.title);

        let mut fetch = Command::new(&config.ytdlp_path)
            .args([
                track.url.as_str(),
                "-f",
                "bestaudio",
                "-o",
                "-",
                "--quiet",
                "--no-warnings",
            ])
            .current_dir(&config.fragment_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlayerError::Resolution(format!("could not start {}: {e}", config.ytdlp_path))
            })?;

        if !config.startup_grace.is_zero() {
            if let Ok(status) = tokio::time::timeout(config.startup_grace, fetch.wait()).await {
                let status = status.map_err(|e| PlayerError::Resolution(e.to_string()))?;
                if !status.success() {
                    return Err(PlayerError::Resolution(format!(
                        "{} exited immediately ({status}) for {}",
                        config.ytdlp_path, track.url
                    )));
                }
            }
        }

        let fetch_out = fetch
            .stdout
            .take()
            .ok_or_else(|| PlayerError::Resolution("fetch stage has no stdout".into()))?;
        let transcode_in: Stdio = fetch_out
            .try_into()
            .map_err(|e: std::io::Error| PlayerError::AudioSource(e.to_string()))?;

        let mut transcode = match Command::new(&config.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "s16le",
                "-ar",
                "48000",
                "-ac",
                "2",
                "pipe:1",
            ])
            .stdin(transcode_in)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = fetch.start_kill();
                return Err(PlayerError::AudioSource(format!(
                    "could not start {}: {e}",
                    config.ffmpeg_path
                )));
            }
        };

        let pcm_out = match transcode.stdout.take() {
            Some(out) => out,
            None => {
                let _ = fetch.start_kill();
                let _ = transcode.start_kill();
                return Err(PlayerError::AudioSource("transcode stage has no stdout".into()));
            }
        };

        let (reader, mut writer) = tokio::io::duplex(config.buffer_size);
        let buffer_size = config.buffer_size;
        let title = track.title.clone();
        let producer = tokio::spawn(async move {
            let mut buffered = BufReader::with_capacity(buffer_size, pcm_out);
            match tokio::io::copy_buf(&mut buffered, &mut writer).await {
                Ok(bytes) => debug!("📦 Pipeline for '{}' finished after {} bytes", title, bytes),
                Err(e) => debug!("📦 Pipeline for '{}' stopped: {}", title, e),
            }
        });

        let pipeline = Pipeline {
            fetch,
            transcode,
            producer,
        };

        Ok(Self {
            reader: Box::new(reader),
            handle: Arc::new(SourceHandle::new(
                &track.title,
                Some(pipeline),
                Some(config.fragment_dir.clone()),
            )),
        })
    }

    /// Wraps an in-process PCM reader with no child processes behind it.
    pub fn from_reader<R>(label: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let label = label.into();
        Self {
            reader: Box::new(reader),
            handle: Arc::new(SourceHandle::new(&label, None, None)),
        }
    }

    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut *self.reader
    }

    /// Shared release handle for this source.
    pub fn handle(&self) -> Arc<SourceHandle> {
        Arc::clone(&self.handle)
    }

    /// Kills the pipeline and closes the stream. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        self.handle.release();
        self.reader = Box::new(tokio::io::empty());
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.handle.release();
    }
}

struct Pipeline {
    fetch: Child,
    transcode: Child,
    producer: JoinHandle<()>,
}

impl Pipeline {
    fn terminate(mut self, label: String, fragment_dir: Option<PathBuf>) {
        self.producer.abort();
        if let Err(e) = self.fetch.start_kill() {
            debug!("fetch stage for '{}' already gone: {}", label, e);
        }
        if let Err(e) = self.transcode.start_kill() {
            debug!("transcode stage for '{}' already gone: {}", label, e);
        }

        // Reap off the caller's path; without a runtime kill_on_drop covers it.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let fetch = self.fetch.wait().await;
                let transcode = self.transcode.wait().await;
                debug!(
                    "🧹 Pipeline for '{}' reaped (fetch: {:?}, transcode: {:?})",
                    label, fetch, transcode
                );
                if let Some(dir) = fragment_dir {
                    let _ = tokio::task::spawn_blocking(move || sweep_fragments(&dir)).await;
                }
            });
        }
    }
}

/// Release handle shared between the playback loop and `Player::stop`.
pub struct SourceHandle {
    label: String,
    pipeline: Mutex<Option<Pipeline>>,
    fragment_dir: Option<PathBuf>,
    released: AtomicBool,
}

impl SourceHandle {
    fn new(label: &str, pipeline: Option<Pipeline>, fragment_dir: Option<PathBuf>) -> Self {
        Self {
            label: label.to_string(),
            pipeline: Mutex::new(pipeline),
            fragment_dir,
            released: AtomicBool::new(false),
        }
    }

    /// Terminates the pipeline. Returns `true` only for the call that actually
    /// released it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        let pipeline = self.pipeline.lock().take();
        if let Some(pipeline) = pipeline {
            pipeline.terminate(self.label.clone(), self.fragment_dir.clone());
        }
        debug!("🧹 Released audio source: {}", self.label);
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn fragment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^--Frag\d+$").expect("fragment pattern is a valid regex"))
}

/// Removes stray `--Frag<digits>` files yt-dlp leaves in `dir`.
///
/// Housekeeping only: unreadable directories and failed removals are logged and
/// skipped. Returns the number of files removed.
pub fn sweep_fragments(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("⚠️ Could not read fragment directory {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_file || !fragment_pattern().is_match(name) {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!("🗑️ Removed fragment file: {}", name);
                removed += 1;
            }
            Err(e) => warn!("⚠️ Could not remove fragment file {}: {}", name, e),
        }
    }
    removed
}
