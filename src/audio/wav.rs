//! In-memory WAV encoding for outgoing audio chunks.
//!
//! The service expects every uploaded chunk to be a self-contained WAV file
//! (canonical 44-byte PCM header followed by little-endian i16 data), so
//! each 200 ms chunk is wrapped individually before base64 encoding.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Encode mono/interleaved i16 PCM as a complete WAV file in memory.
pub fn encode_wav(
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
