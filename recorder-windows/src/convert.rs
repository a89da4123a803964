//! WASAPI shared-mode buffers to the capture loop's PCM format.
//!
//! Shared mode hands out interleaved `f32` at the endpoint's mix rate
//! (typically 48 kHz stereo). The recorder wants 44.1 kHz mono 16-bit LE.

use recorder_core::PcmFormat;

/// Downmix, resample (linear interpolation) and quantize one buffer.
#[derive(Debug, Clone, Copy)]
pub struct MicConverter {
    source_rate: u32,
    source_channels: u16,
    target: PcmFormat,
}

impl MicConverter {
    pub fn new(source_rate: u32, source_channels: u16, target: PcmFormat) -> Self {
        Self {
            source_rate,
            source_channels: source_channels.max(1),
            target,
        }
    }

    pub fn convert(&self, interleaved: &[f32]) -> Vec<u8> {
        let mono = downmix(interleaved, self.source_channels as usize);
        let resampled = resample(&mono, self.source_rate, self.target.sample_rate);
        to_int16_le(&resampled)
    }
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || source_rate == 0 {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_count = (samples.len() as f64 * ratio) as usize;
    let mut output = vec![0.0f32; output_count];
    for (i, sample) in output.iter_mut().enumerate() {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        if index + 1 < samples.len() {
            *sample = samples[index] * (1.0 - fraction) + samples[index + 1] * fraction;
        } else if index < samples.len() {
            *sample = samples[index];
        }
    }
    output
}

fn to_int16_le(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}
