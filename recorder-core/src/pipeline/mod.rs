pub mod audio_encode;
pub mod capture_loop;
pub(crate) mod drain;
pub mod mux;
pub mod pause_gate;
pub(crate) mod threads;
pub mod video_encoder;
