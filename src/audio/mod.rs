//! # Audio Module
//!
//! Shared PCM definitions plus the two small audio utilities the gateway
//! carries: a jitter-absorbing ring buffer and an energy-based voice
//! activity detector.
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod ring;      // Bounded byte buffer with drop-on-full writes
pub mod vad;       // Voice activity detection with hysteresis

use byteorder::{ByteOrder, LittleEndian};

/// Sample rate the whole pipeline runs at.
pub const SAMPLE_RATE: u32 = 16_000;

/// Mono audio throughout.
pub const CHANNELS: u32 = 1;

/// 16-bit PCM.
pub const BITS_PER_SAMPLE: u32 = 16;

/// Bytes per sample (16-bit → 2).
pub const BYTES_PER_SAMPLE: u32 = BITS_PER_SAMPLE / 8;

/// Decode raw little-endian PCM bytes into 16-bit samples.
///
/// A trailing odd byte is ignored rather than treated as an error; audio
/// frames from the wire are loss tolerant.
pub fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    let mut samples = vec![0i16; data.len() / 2];
    LittleEndian::read_i16_into(&data[..samples.len() * 2], &mut samples);
    samples
}

/// Encode 16-bit samples back into little-endian PCM bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut buf = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut buf);
    buf
}

/// Number of samples covering `ms` milliseconds at the pipeline sample rate.
pub fn samples_for_duration(ms: u32) -> usize {
    (ms as usize * SAMPLE_RATE as usize) / 1000
}

/// Duration in milliseconds of `samples` samples at the pipeline sample rate.
pub fn duration_ms(samples: usize) -> u32 {
    ((samples * 1000) / SAMPLE_RATE as usize) as u32
}
