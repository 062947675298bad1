//! # Sources
//!
//! Track metadata lookup. The playback core only sees [`Track`] values; this
//! module turns user queries and URLs into them.

pub mod ytdlp;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::{
    audio::track::Track,
    error::{PlayerError, Result},
};

pub use ytdlp::YtDlpResolver;

/// Resolves queries, video URLs and playlists into tracks.
///
/// Every failure is reported as [`PlayerError::Resolution`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// First search hit for a free-text query.
    async fn search(&self, query: &str) -> Result<Track>;

    /// Metadata of a single video URL.
    async fn info(&self, url: &str) -> Result<Track>;

    /// Up to `limit` entries of a playlist, optionally shuffled.
    async fn playlist(&self, url: &str, limit: usize, shuffle: bool) -> Result<Vec<Track>>;
}

/// Absolute http(s) URL.
pub fn is_valid_url(input: &str) -> bool {
    match Url::parse(input.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

pub fn is_playlist_url(input: &str) -> bool {
    is_valid_url(input) && input.contains("list=")
}

/// `/play` lookup: URLs go through `info`, anything else is searched.
pub async fn resolve_query(resolver: &dyn MetadataResolver, query: &str) -> Result<Track> {
    let query = query.trim();
    if query.is_empty() {
        return Err(PlayerError::Resolution("empty query".into()));
    }

    if is_valid_url(query) {
        debug!("🔗 Resolving URL: {}", query);
        resolver.info(query).await
    } else {
        info!("🔍 Searching: {}", query);
        resolver.search(query).await
    }
}

/// `/playlist` lookup with URL validation.
pub async fn resolve_playlist(
    resolver: &dyn MetadataResolver,
    url: &str,
    limit: usize,
    shuffle: bool,
) -> Result<Vec<Track>> {
    let url = url.trim();
    if !is_playlist_url(url) {
        return Err(PlayerError::Resolution(format!("not a playlist URL: {url}")));
    }
    if limit == 0 {
        return Ok(Vec::new());
    }

    info!("📋 Loading playlist: {} (limit {}, shuffle {})", url, limit, shuffle);
    let tracks = resolver.playlist(url, limit, shuffle).await?;
    Ok(tracks.into_iter().take(limit).collect())
}
