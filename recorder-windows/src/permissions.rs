//! Windows microphone privacy permission check.
//!
//! On Windows 10 1803+, microphone access is controlled by the privacy
//! settings at Settings > Privacy > Microphone. Desktop apps are generally
//! allowed unless the user has disabled the global toggle.
//!
//! There is no per-app consent dialog for unpackaged desktop apps.
//! Packaged apps (MSIX/UWP) get an automatic consent prompt.

use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use recorder_core::{Capability, PermissionProvider, RecorderError};

/// `E_ACCESSDENIED`
const E_ACCESS_DENIED: i32 = -2147024891;
/// `AUDCLNT_E_DEVICE_IN_USE`
const AUDCLNT_DEVICE_IN_USE: i32 = -2004287478;

/// Check if microphone access is available.
///
/// Attempts to activate the default capture device. If it fails with
/// `AUDCLNT_E_DEVICE_IN_USE` or access denied, microphone permission
/// is likely disabled in Windows Privacy Settings.
pub fn check_microphone_permission() -> Result<bool, RecorderError> {
    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| RecorderError::DeviceUnavailable(format!("CoInitializeEx failed: {}", e)))?;

        let result = check_mic_access_inner();

        CoUninitialize();
        result
    }
}

unsafe fn check_mic_access_inner() -> Result<bool, RecorderError> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| RecorderError::DeviceUnavailable(format!("failed to create enumerator: {}", e)))?;

    let device = match enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) {
        Ok(d) => d,
        Err(_) => return Ok(false), // No capture device
    };

    match device.Activate::<IAudioClient>(CLSCTX_ALL, None) {
        Ok(_) => Ok(true),
        Err(e) => {
            let code = e.code().0;
            if code == E_ACCESS_DENIED || code == AUDCLNT_DEVICE_IN_USE {
                Ok(false)
            } else {
                log::warn!("Unexpected error checking mic permission: {}", e);
                Ok(true)
            }
        }
    }
}

/// `PermissionProvider` backed by the Windows privacy settings.
///
/// Desktop Windows has no phone-state grant; it is always reported as held.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPermissions;

impl PermissionProvider for WindowsPermissions {
    fn has_permission(&self, capability: Capability) -> bool {
        match capability {
            Capability::Microphone => check_microphone_permission().unwrap_or_else(|e| {
                log::warn!("Microphone permission check failed: {}", e);
                false
            }),
            Capability::PhoneState => true,
        }
    }
}
