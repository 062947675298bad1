use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::{
    audio::track::Track,
    error::{PlayerError, Result},
};

/// Per-guild FIFO of pending tracks.
///
/// Every operation takes the internal lock, so the command path and the
/// playback loop may call into the same queue concurrently without any
/// external locking.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: Mutex<VecDeque<Track>>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track to the back of the queue.
    pub fn enqueue(&self, track: Track) {
        debug!("➕ Queued: {}", track.title);
        self.items.lock().push_back(track);
    }

    /// Appends several tracks under one lock, preserving their order.
    pub fn enqueue_all(&self, tracks: impl IntoIterator<Item = Track>) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.extend(tracks);
        let added = items.len() - before;
        info!("➕ Queued {} tracks", added);
        added
    }

    /// Puts a track back at the head, ahead of everything already queued.
    pub fn requeue_front(&self, track: Track) {
        debug!("↩️ Requeued: {}", track.title);
        self.items.lock().push_front(track);
    }

    /// Removes and returns the head, or `None` once the queue is exhausted.
    pub fn dequeue(&self) -> Option<Track> {
        let next = self.items.lock().pop_front();
        if next.is_none() {
            debug!("📭 Queue is empty");
        }
        next
    }

    /// Removes the track at a 1-indexed position, shifting later tracks down.
    pub fn remove_at(&self, position: usize) -> Result<Track> {
        let mut items = self.items.lock();
        let size = items.len();
        if position == 0 || position > size {
            return Err(PlayerError::InvalidPosition { position, size });
        }

        let removed = items
            .remove(position - 1)
            .ok_or(PlayerError::InvalidPosition { position, size })?;
        debug!("❌ Removed position {}: {}", position, removed.title);
        Ok(removed)
    }

    /// Removes the first track satisfying `predicate`.
    pub fn remove_first<F>(&self, predicate: F) -> Option<Track>
    where
        F: Fn(&Track) -> bool,
    {
        let mut items = self.items.lock();
        let index = items.iter().position(|track| predicate(track))?;
        items.remove(index)
    }

    /// Removes the first track whose title contains `query`, ignoring case.
    pub fn remove_matching(&self, query: &str) -> Result<Track> {
        self.remove_first(|track| track.title_contains(query))
            .ok_or_else(|| PlayerError::NotFound(query.to_string()))
    }

    pub fn peek(&self) -> Option<Track> {
        self.items.lock().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let cleared = items.len();
        items.clear();
        info!("🗑️ Queue cleared: {} tracks removed", cleared);
        cleared
    }

    /// Independent copy of the queued tracks, in playback order.
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.lock().iter().cloned().collect()
    }
}

/// One page of a queue snapshot, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<Track>,
    /// 1-indexed position of the first item on this page.
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl QueuePage {
    /// Slices `tracks` into the requested page; out of range pages are clamped
    /// into `1..=total_pages`.
    pub fn paginate(tracks: &[Track], page: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let total_items = tracks.len();
        let total_pages = total_items.div_ceil(page_size).max(1);
        let current_page = page.clamp(1, total_pages);

        let start = (current_page - 1) * page_size;
        let end = (start + page_size).min(total_items);
        let items = if start < total_items {
            tracks[start..end].to_vec()
        } else {
            Vec::new()
        };

        Self {
            items,
            first_position: start + 1,
            current_page,
            total_pages,
            total_items,
        }
    }
}
