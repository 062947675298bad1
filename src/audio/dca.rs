//! Live DCA stream fed with pre-encoded Opus packets.
//!
//! songbird recognises DCA natively and forwards its Opus packets to Discord
//! without decoding them again, which is what lets the playback loop own the
//! encoder. Layout: `DCA1`, an `i32` LE metadata length, JSON metadata, then
//! one `i16` LE length prefix per Opus packet.

use bytes::Bytes;
use flume::{Receiver, TryRecvError};
use serde_json::json;
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::io::MediaSource;

use crate::audio::encoder::{FRAME_SAMPLES, SAMPLE_RATE};

const MAGIC: &[u8; 4] = b"DCA1";

/// Opus packet for 20ms of silence.
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

pub struct DcaStream {
    frames: Receiver<Bytes>,
    pending: Vec<u8>,
    cursor: usize,
    finished: bool,
}

impl DcaStream {
    pub fn new(frames: Receiver<Bytes>, bitrate: u32) -> Self {
        Self {
            frames,
            pending: header(bitrate),
            cursor: 0,
            finished: false,
        }
    }

    fn push_packet(&mut self, packet: &[u8]) {
        self.pending.clear();
        self.cursor = 0;
        let len = i16::try_from(packet.len()).unwrap_or(i16::MAX);
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending.extend_from_slice(&packet[..len as usize]);
    }

    /// Loads the next packet without waiting. Reads happen on songbird's mixer
    /// thread, so an empty channel yields silence instead of blocking it.
    fn refill(&mut self) -> bool {
        match self.frames.try_recv() {
            Ok(packet) => self.push_packet(&packet),
            Err(TryRecvError::Empty) => self.push_packet(&SILENCE_FRAME),
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                return false;
            }
        }
        true
    }
}

fn header(bitrate: u32) -> Vec<u8> {
    let metadata = json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null
            }
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SAMPLES,
            "abr": bitrate,
            "vbr": true,
            "channels": 2
        },
        "info": null,
        "origin": null,
        "extra": null
    })
    .to_string();

    let mut out = Vec::with_capacity(8 + metadata.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(metadata.len() as i32).to_le_bytes());
    out.extend_from_slice(metadata.as_bytes());
    out
}

impl Read for DcaStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.cursor == self.pending.len() && (self.finished || !self.refill()) {
            return Ok(0);
        }

        let available = &self.pending[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

impl Seek for DcaStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live DCA stream is not seekable",
        ))
    }
}

impl MediaSource for DcaStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
