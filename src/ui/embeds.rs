use serenity::builder::{CreateEmbed, CreateEmbedFooter};

use crate::audio::{queue::QueuePage, track::Track};

/// Standard colour palette.
pub mod colors {
    use serenity::all::Colour;

    pub const TRACK_GREEN: Colour = Colour::new(0x1DB954);
    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

pub const EMPTY_QUEUE: &str = "The queue is empty.";

/// Embed for a single track; `status` becomes the footer.
pub fn track_embed(track: &Track, status: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&track.title)
        .url(&track.url)
        .description(track_description(track))
        .color(colors::TRACK_GREEN)
        .footer(CreateEmbedFooter::new(status));

    if let Some(thumbnail) = track.thumbnail_url() {
        embed = embed.thumbnail(thumbnail);
    }
    embed
}

pub fn track_description(track: &Track) -> String {
    format!("Channel: **{}**\nDuration: `{}`", track.channel, track.duration)
}

/// Embed listing one page of the queue.
pub fn queue_embed(page: &QueuePage) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Queue")
        .description(queue_description(&page.items, page.first_position))
        .color(colors::TRACK_GREEN);

    if let Some(footer) = page_footer(page) {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }
    embed
}

/// One markdown link per track, numbered from `first_position`.
pub fn queue_description(tracks: &[Track], first_position: usize) -> String {
    if tracks.is_empty() {
        return EMPTY_QUEUE.to_string();
    }

    tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            format!(
                "{}. [{}]({}) `[{}]`",
                first_position + i,
                track.title,
                track.url,
                track.duration
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Only shown when there is more than one page.
pub fn page_footer(page: &QueuePage) -> Option<String> {
    (page.total_pages > 1).then(|| {
        format!(
            "Page {} of {} · {} songs",
            page.current_page, page.total_pages, page.total_items
        )
    })
}

pub fn error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
}

pub fn success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
}

pub fn info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
}
