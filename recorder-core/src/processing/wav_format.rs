/// RIFF/WAVE header synthesis and parsing.
///
/// The header is written once, after the raw PCM length is known, so every
/// size field is final at write time.
use crate::models::media::PcmFormat;

/// Size of the canonical PCM WAV header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Largest PCM payload whose RIFF chunk size still fits in a `u32`.
pub const MAX_WAV_DATA_SIZE: u64 = u32::MAX as u64 - 36;

/// Generate a 44-byte WAV RIFF header.
///
/// Layout (little-endian):
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bits / 8
/// [32-33]  block_align = channels * bits / 8
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: PcmFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Decoded fields of a canonical 44-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_chunk_size: u32,
    pub format: PcmFormat,
    pub byte_rate: u32,
    pub block_align: u16,
    pub data_size: u32,
}

/// Parse a canonical PCM header. Returns `None` for anything else.
pub fn parse_wav_header(bytes: &[u8]) -> Option<WavHeader> {
    if bytes.len() < WAV_HEADER_SIZE
        || &bytes[0..4] != b"RIFF"
        || &bytes[8..12] != b"WAVE"
        || &bytes[12..16] != b"fmt "
        || &bytes[36..40] != b"data"
    {
        return None;
    }

    let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

    if u32_at(16) != 16 || u16_at(20) != 1 {
        return None;
    }

    Some(WavHeader {
        riff_chunk_size: u32_at(4),
        format: PcmFormat {
            sample_rate: u32_at(24),
            channels: u16_at(22),
            bits_per_sample: u16_at(34),
        },
        byte_rate: u32_at(28),
        block_align: u16_at(32),
        data_size: u32_at(40),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_magic_and_size() {
        let header = generate_wav_header(PcmFormat::MIC, 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_44khz_mono_16bit() {
        let header = generate_wav_header(PcmFormat::MIC, 5120);

        let parsed = parse_wav_header(&header).unwrap();
        assert_eq!(parsed.riff_chunk_size, 36 + 5120);
        assert_eq!(parsed.data_size, 5120);
        assert_eq!(parsed.format, PcmFormat::MIC);
        assert_eq!(parsed.byte_rate, 88200); // 44100 * 1 * 16/8
        assert_eq!(parsed.block_align, 2);
    }

    #[test]
    fn header_fmt_fields_are_raw_bytes() {
        let header = generate_wav_header(PcmFormat::MIC, 0);
        // fmt chunk size = 16, format code = 1 (PCM)
        assert_eq!(u32::from_le_bytes([header[16], header[17], header[18], header[19]]), 16);
        assert_eq!(u16::from_le_bytes([header[20], header[21]]), 1);
        assert_eq!(u32::from_le_bytes([header[24], header[25], header[26], header[27]]), 44100);
    }

    #[test]
    fn parse_rejects_non_wave() {
        assert!(parse_wav_header(b"not a wave file at all, definitely not 44 b").is_none());
        assert!(parse_wav_header(&[0u8; 10]).is_none());
    }
}
