pub mod levels;
pub mod negotiation;
pub mod wav_format;
pub mod wave_writer;
