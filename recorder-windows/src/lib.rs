//! # recorder-windows
//!
//! Windows WASAPI backend for recorder-core.
//!
//! Provides:
//! - `WasapiMicDevice`: microphone capture via a WASAPI capture endpoint,
//!   implementing `recorder_core::AudioDevice`
//! - `WindowsPermissions`: Windows microphone privacy check, implementing
//!   `recorder_core::PermissionProvider`
//! - `MicConverter`: shared-mode `f32` buffers to 44.1 kHz mono 16-bit PCM
//!
//! ## Platform Requirements
//! - Windows 10 1803+ for the microphone privacy settings
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use recorder_core::{AudioCaptureLoop, AudioDevice};
//! use recorder_windows::WasapiMicDevice;
//!
//! let mic = WasapiMicDevice::default_device();
//! let capture = AudioCaptureLoop::new(Box::new(mic), sink, join_timeout);
//! capture.start()?;
//! ```

pub mod convert;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_mic;

pub use convert::MicConverter;
#[cfg(target_os = "windows")]
pub use permissions::WindowsPermissions;
#[cfg(target_os = "windows")]
pub use wasapi_mic::WasapiMicDevice;
