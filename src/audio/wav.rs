use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

/// WAV parse failures. Unsupported variants are configuration errors the
/// caller gets back verbatim; no partial state is retained.
#[derive(Debug, Error)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    NotRiff,
    #[error("missing '{0}' chunk")]
    MissingChunk(&'static str),
    #[error("unsupported WAV variant: format tag {0} (only PCM is supported)")]
    UnsupportedFormat(u16),
    #[error("unsupported bit depth {0} (only 8 and 16 bit PCM)")]
    UnsupportedBitDepth(u16),
    #[error("unsupported channel count {0} (only mono and stereo)")]
    UnsupportedChannels(u16),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decoded PCM audio. Samples are interleaved and normalized to f32 in
/// [-1, 1]; playback itself happens outside the core.
#[derive(Clone, Debug)]
pub struct WavData {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub samples: Vec<f32>,
}

const FORMAT_PCM: u16 = 1;

/// Parses a canonical RIFF/WAVE stream by walking its chunk list.
///
/// The "fmt " and "data" chunks may appear in any order and other chunks
/// (LIST, fact, cue) are skipped; chunk payloads are padded to even length
/// per the RIFF rules, so odd-sized chunks skip one extra byte.
pub fn parse(bytes: &[u8]) -> Result<WavData, WavError> {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if &magic != b"RIFF" {
        return Err(WavError::NotRiff);
    }
    let _riff_size = cursor.read_u32::<LittleEndian>()?;
    cursor.read_exact(&mut magic)?;
    if &magic != b"WAVE" {
        return Err(WavError::NotRiff);
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut data: Option<Vec<u8>> = None;

    while (cursor.position() as usize) + 8 <= bytes.len() {
        let mut id = [0u8; 4];
        cursor.read_exact(&mut id)?;
        let size = cursor.read_u32::<LittleEndian>()? as u64;
        match &id {
            b"fmt " => {
                let format_tag = cursor.read_u16::<LittleEndian>()?;
                let channels = cursor.read_u16::<LittleEndian>()?;
                let sample_rate = cursor.read_u32::<LittleEndian>()?;
                let _byte_rate = cursor.read_u32::<LittleEndian>()?;
                let _block_align = cursor.read_u16::<LittleEndian>()?;
                let bits_per_sample = cursor.read_u16::<LittleEndian>()?;
                format = Some((format_tag, channels, sample_rate, bits_per_sample));
                // Skip any extension bytes beyond the 16-byte PCM header.
                if size > 16 {
                    cursor.seek(SeekFrom::Current(size as i64 - 16))?;
                }
            }
            b"data" => {
                let mut payload = vec![0u8; size as usize];
                cursor.read_exact(&mut payload)?;
                data = Some(payload);
            }
            _ => {
                cursor.seek(SeekFrom::Current(size as i64))?;
            }
        }
        // RIFF chunks are word-aligned.
        if size % 2 == 1 {
            cursor.seek(SeekFrom::Current(1))?;
        }
    }

    let (format_tag, channels, sample_rate, bits_per_sample) =
        format.ok_or(WavError::MissingChunk("fmt "))?;
    let data = data.ok_or(WavError::MissingChunk("data"))?;

    if format_tag != FORMAT_PCM {
        return Err(WavError::UnsupportedFormat(format_tag));
    }
    if !matches!(channels, 1 | 2) {
        return Err(WavError::UnsupportedChannels(channels));
    }

    let samples = match bits_per_sample {
        8 => data
            .iter()
            .map(|&b| (f32::from(b) - 128.0) / 128.0)
            .collect(),
        16 => data
            .chunks_exact(2)
            .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
            .collect(),
        other => return Err(WavError::UnsupportedBitDepth(other)),
    };

    Ok(WavData {
        channels,
        sample_rate,
        bits_per_sample,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(extra_chunk: bool, bits: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes()); // size patched below
        out.extend_from_slice(b"WAVE");
        if extra_chunk {
            // An odd-sized junk chunk exercises the even-byte alignment.
            out.extend_from_slice(b"LIST");
            out.extend_from_slice(&3u32.to_le_bytes());
            out.extend_from_slice(&[1, 2, 3, 0]);
        }
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&44100u32.to_le_bytes());
        out.extend_from_slice(&(44100u32 * u32::from(bits / 8)).to_le_bytes());
        out.extend_from_slice(&u16::from(bits / 8).to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        let total = out.len() as u32 - 8;
        out[4..8].copy_from_slice(&total.to_le_bytes());
        out
    }

    #[test]
    fn parses_16_bit_mono() {
        let bytes = wav_bytes(false, 16, &i16::MAX.to_le_bytes());
        let wav = parse(&bytes).unwrap();
        assert_eq!(wav.channels, 1);
        assert_eq!(wav.sample_rate, 44100);
        assert_eq!(wav.samples.len(), 1);
        assert!((wav.samples[0] - (32767.0 / 32768.0)).abs() < 1e-6);
    }

    #[test]
    fn walks_past_odd_sized_chunks() {
        let bytes = wav_bytes(true, 8, &[128, 255, 0]);
        let wav = parse(&bytes).unwrap();
        assert_eq!(wav.samples.len(), 3);
        assert!((wav.samples[0]).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_pcm() {
        let mut bytes = wav_bytes(false, 16, &[0, 0]);
        // Patch the format tag to IEEE float (3).
        let fmt_offset = 12 + 8;
        bytes[fmt_offset..fmt_offset + 2].copy_from_slice(&3u16.to_le_bytes());
        assert!(matches!(parse(&bytes), Err(WavError::UnsupportedFormat(3))));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(parse(b"RIFFxxxx"), Err(WavError::NotRiff) | Err(WavError::Io(_))));
    }
}
