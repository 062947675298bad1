use async_trait::async_trait;

use crate::audio::{queue::QueuePage, track::Track};

/// Footer shown when a track starts.
pub const STATUS_PLAYING: &str = "Playing!";
/// Footer shown when a track is added behind the current one.
pub const STATUS_QUEUED: &str = "Queued to play.";

/// User-facing announcements. Fire-and-forget for the player: failures are
/// logged and never interrupt playback.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, track: &Track, status: &str) -> anyhow::Result<()>;

    /// One page of the queue: its tracks, page number and page count.
    async fn announce_queue(&self, page: &QueuePage) -> anyhow::Result<()>;
}
