use serde::{Deserialize, Serialize};
use std::fmt;

/// Thumbnail value yt-dlp prints when a video has none.
const MISSING_THUMBNAIL: &str = "NA";

/// Immutable description of a playable item, as printed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub duration: String,
    pub url: String,
    pub thumbnail: String,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        channel: impl Into<String>,
        duration: impl Into<String>,
        url: impl Into<String>,
        thumbnail: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            channel: channel.into(),
            duration: duration.into(),
            url: url.into(),
            thumbnail: thumbnail.into(),
        }
    }

    /// Thumbnail URL, if the resolver reported one.
    pub fn thumbnail_url(&self) -> Option<&str> {
        let thumb = self.thumbnail.trim();
        if thumb.is_empty() || thumb == MISSING_THUMBNAIL {
            None
        } else {
            Some(thumb)
        }
    }

    /// Case-insensitive substring match against the title.
    pub fn title_contains(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(&query.to_lowercase())
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.title, self.duration)
    }
}
