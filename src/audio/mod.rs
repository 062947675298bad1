//! # Audio Module
//!
//! Per-guild playback engine: queueing, the fetch/transcode pipeline, Opus
//! framing and the voice transport.
//!
//! ## Architecture
//!
//! ### [`player`] - Playback state machine
//! - One [`Player`] per guild, `Idle` or `Playing`
//! - Runs a single playback loop that streams 20ms frames to the transport
//! - `add_track`, `skip` and `stop` never block on the loop
//!
//! ### [`queue`] - Queue Management
//! - Thread-safe FIFO with positional and title-match removal
//! - Snapshots and pagination for display
//!
//! ### [`source`] - Audio pipeline
//! - yt-dlp piped into ffmpeg, producing 48kHz s16le stereo PCM
//! - Idempotent release that kills both processes and sweeps fragments
//!
//! ### [`transport`] / [`dca`] - Voice output
//! - Pre-encoded Opus frames handed to songbird through a live DCA stream
//!
//! ### [`session`] - Guild sessions
//! - Lazily created per guild, torn down when the voice connection drops
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers, little endian
//! - **Channels**: Stereo (2 channels), interleaved
//! - **Frame**: 960 samples per channel (20ms)
//! - **Encoding**: Opus at 96kbps (configurable)

pub mod dca;
pub mod encoder;
pub mod notifier;
pub mod player;
pub mod queue;
pub mod session;
pub mod source;
pub mod track;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use encoder::{FrameEncoder, OpusFrameEncoder};
pub use notifier::Notifier;
pub use player::{PlaybackConfig, Player, PlayerDeps, PlayerStatus};
pub use queue::{QueuePage, TrackQueue};
pub use session::{GuildSession, SessionRegistry};
pub use source::{AudioSource, PipelineConfig, SourceOpener, YtDlpPipeline};
pub use track::Track;
pub use transport::{SongbirdTransport, Transport};
