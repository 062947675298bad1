use async_trait::async_trait;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;

use crate::{
    audio::{notifier::Notifier, queue::QueuePage, track::Track},
    ui::embeds,
};

/// Posts announcements as embeds in the text channel a session was started from.
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn announce(&self, track: &Track, status: &str) -> anyhow::Result<()> {
        self.channel_id
            .send_message(
                &self.http,
                CreateMessage::new().embed(embeds::track_embed(track, status)),
            )
            .await?;
        Ok(())
    }

    async fn announce_queue(&self, page: &QueuePage) -> anyhow::Result<()> {
        self.channel_id
            .send_message(&self.http, CreateMessage::new().embed(embeds::queue_embed(page)))
            .await?;
        Ok(())
    }
}
