//! # WAV Header Reader
//!
//! Parses just enough of a RIFF/WAVE container to learn how fast its audio
//! plays back. Reading stops right after the `fmt ` fields; the sample data is
//! never touched.
//!
//! ## Container Layout:
//! ```text
//! "RIFF" <u32 size> "WAVE"
//!   <chunk id> <u32 size> <payload, padded to even length>   (repeated)
//!   "fmt " 16+ bytes: format u16, channels u16, sample rate u32,
//!                     byte rate u32, block align u16, bits per sample u16
//! ```
//! Chunks such as `LIST` or `fact` may precede `fmt ` and are skipped.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

/// The fields of a `fmt ` chunk that pacing depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    /// Format tag (1 = integer PCM)
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavHeader {
    /// Bytes of audio per second of playback.
    ///
    /// ## Calculation:
    /// `sample_rate * channels * bits_per_sample / 8`, kept fractional so that
    /// odd bit depths do not round the duration.
    pub fn byte_rate(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64 * self.bits_per_sample as f64 / 8.0
    }
}

/// Upper bound on chunks walked before giving up on finding `fmt `.
const MAX_CHUNKS_BEFORE_FMT: usize = 64;

/// Read a WAV header from the start of `reader`.
///
/// ## Returns:
/// - **Ok(WavHeader)**: The container exposes sample rate, channels and bit depth
/// - **Err(String)**: Why the header is unusable (the caller adds the file path)
pub fn read_wav_header<R: Read>(mut reader: R) -> Result<WavHeader, String> {
    let riff = read_tag(&mut reader).map_err(describe_io)?;
    if &riff != b"RIFF" {
        return Err("missing RIFF signature".to_string());
    }
    // Overall container size; we trust the file length instead
    reader.read_u32::<LittleEndian>().map_err(describe_io)?;
    let wave = read_tag(&mut reader).map_err(describe_io)?;
    if &wave != b"WAVE" {
        return Err("RIFF container is not of type WAVE".to_string());
    }

    for _ in 0..MAX_CHUNKS_BEFORE_FMT {
        let id = read_tag(&mut reader).map_err(|_| "no fmt chunk before end of file".to_string())?;
        let size = reader.read_u32::<LittleEndian>().map_err(describe_io)?;

        if &id == b"data" {
            return Err("data chunk found before fmt chunk".to_string());
        }
        if &id != b"fmt " {
            skip(&mut reader, size as u64 + (size as u64 & 1)).map_err(describe_io)?;
            continue;
        }
        if size < 16 {
            return Err(format!("fmt chunk is {} bytes, expected at least 16", size));
        }

        let audio_format = reader.read_u16::<LittleEndian>().map_err(describe_io)?;
        let channels = reader.read_u16::<LittleEndian>().map_err(describe_io)?;
        let sample_rate = reader.read_u32::<LittleEndian>().map_err(describe_io)?;
        let _byte_rate = reader.read_u32::<LittleEndian>().map_err(describe_io)?;
        let _block_align = reader.read_u16::<LittleEndian>().map_err(describe_io)?;
        let bits_per_sample = reader.read_u16::<LittleEndian>().map_err(describe_io)?;

        if channels == 0 {
            return Err("channel count is zero".to_string());
        }
        if sample_rate == 0 {
            return Err("sample rate is zero".to_string());
        }
        if bits_per_sample == 0 {
            return Err("bits per sample is zero".to_string());
        }

        return Ok(WavHeader {
            audio_format,
            channels,
            sample_rate,
            bits_per_sample,
        });
    }

    Err(format!("no fmt chunk within the first {} chunks", MAX_CHUNKS_BEFORE_FMT))
}

fn read_tag<R: Read>(reader: &mut R) -> io::Result<[u8; 4]> {
    let mut tag = [0u8; 4];
    reader.read_exact(&mut tag)?;
    Ok(tag)
}

fn skip<R: Read>(reader: &mut R, count: u64) -> io::Result<()> {
    let skipped = io::copy(&mut reader.take(count), &mut io::sink())?;
    if skipped < count {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(())
}

fn describe_io(err: io::Error) -> String {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => "header is truncated".to_string(),
        _ => format!("could not read header: {}", err),
    }
}
