use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;

use crate::error::{PlayerError, Result};

/// Output sample rate of the transcode stage and input rate of the encoder.
pub const SAMPLE_RATE: u32 = 48_000;
/// Interleaved stereo.
pub const CHANNELS: usize = 2;
/// Samples per channel in one 20ms frame.
pub const FRAME_SAMPLES: usize = 960;
/// Interleaved `i16` samples in one frame.
pub const FRAME_PCM_LEN: usize = FRAME_SAMPLES * CHANNELS;
/// Raw s16le bytes in one frame.
pub const FRAME_BYTES: usize = FRAME_PCM_LEN * 2;
/// Upper bound for one encoded Opus packet.
pub const MAX_PACKET_BYTES: usize = 1275;

/// Converts one PCM frame into a compressed packet for the transport.
pub trait FrameEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes>;
}

/// Builds a fresh encoder for each track.
pub type EncoderFactory = fn(bitrate: u32) -> Result<Box<dyn FrameEncoder>>;

/// libopus encoder configured for 48kHz stereo music.
pub struct OpusFrameEncoder {
    encoder: Encoder,
    packet: Vec<u8>,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32) -> Result<Self> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| PlayerError::Encode(format!("could not create Opus encoder: {e}")))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))
            .map_err(|e| PlayerError::Encode(format!("invalid bitrate {bitrate}: {e}")))?;

        Ok(Self {
            encoder,
            packet: vec![0u8; MAX_PACKET_BYTES],
        })
    }

    /// [`EncoderFactory`] producing Opus encoders.
    pub fn boxed(bitrate: u32) -> Result<Box<dyn FrameEncoder>> {
        Ok(Box::new(Self::new(bitrate)?))
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes> {
        if pcm.len() != FRAME_PCM_LEN {
            return Err(PlayerError::Encode(format!(
                "expected {} samples per frame, got {}",
                FRAME_PCM_LEN,
                pcm.len()
            )));
        }

        let len = self
            .encoder
            .encode(pcm, &mut self.packet)
            .map_err(|e| PlayerError::Encode(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&self.packet[..len]))
    }
}

/// Decodes a raw s16le frame into interleaved samples.
pub fn decode_pcm_frame(raw: &[u8], pcm: &mut [i16]) {
    for (sample, bytes) in pcm.iter_mut().zip(raw.chunks_exact(2)) {
        *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
    }
}
