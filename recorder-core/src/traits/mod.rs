pub mod audio_device;
pub mod backend;
pub mod collaborators;
pub mod container;
pub mod encoder;
pub mod observer;
