//! Input level math over 16-bit little-endian PCM.

/// Largest value an amplitude reading can take.
pub const MAX_AMPLITUDE: u32 = i16::MAX as u32;

/// RMS of the signed 16-bit samples in `pcm`, clamped to `0..=MAX_AMPLITUDE`.
///
/// This is the root of the mean square, not the mean square itself: the
/// reading is linear in signal amplitude and stays within the sample range,
/// where a mean square of full-scale audio would reach about 2^30.
///
/// A trailing odd byte is ignored. Empty input reads as silence.
pub fn rms_amplitude(pcm: &[u8]) -> u32 {
    let samples = pcm.chunks_exact(2);
    let count = samples.len();
    if count == 0 {
        return 0;
    }
    let sum_sq: f64 = samples
        .map(|b| {
            let s = i16::from_le_bytes([b[0], b[1]]) as f64;
            s * s
        })
        .sum();
    let rms = (sum_sq / count as f64).sqrt();
    (rms.round() as u32).min(MAX_AMPLITUDE)
}
