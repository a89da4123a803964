//! WASAPI microphone as a recorder-core `AudioDevice`.
//!
//! A dedicated thread owns the COM objects, polls the capture client and
//! converts each packet to 44.1 kHz mono 16-bit PCM. `read` drains the
//! converted bytes from a shared queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use recorder_core::{AudioDevice, PcmFormat, RecorderError};

use crate::convert::MicConverter;

/// How long `open` waits for the endpoint to initialize.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest a `read` blocks when no audio is queued.
const READ_WAIT: Duration = Duration::from_millis(20);

/// Shared-mode buffer duration in 100 ns units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;

/// Converted audio older than this is dropped if nobody reads it.
const MAX_QUEUED: Duration = Duration::from_secs(2);

struct Shared {
    pcm: Mutex<VecDeque<u8>>,
    available: Condvar,
    running: AtomicBool,
    delivering: AtomicBool,
    failure: Mutex<Option<RecorderError>>,
}

/// WASAPI capture endpoint in shared mode.
pub struct WasapiMicDevice {
    device_id: Option<String>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WasapiMicDevice {
    /// The system default microphone.
    pub fn default_device() -> Self {
        Self::new(None)
    }

    /// A specific endpoint by MMDevice id.
    pub fn with_device(id: impl Into<String>) -> Self {
        Self::new(Some(id.into()))
    }

    fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            shared: Arc::new(Shared {
                pcm: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                running: AtomicBool::new(false),
                delivering: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
            handle: None,
        }
    }

    fn join_thread(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.available.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("WASAPI microphone thread panicked");
            }
        }
    }
}

impl AudioDevice for WasapiMicDevice {
    fn open(&mut self, format: PcmFormat) -> std::result::Result<(), RecorderError> {
        if format != PcmFormat::MIC {
            return Err(RecorderError::DeviceUnavailable(format!("unsupported capture format {:?}", format)));
        }
        if self.handle.is_some() {
            return Err(RecorderError::InvalidState("microphone already open".into()));
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("wasapi-mic".into())
            .spawn(move || {
                if let Err(e) = mic_capture_loop(&shared, device_id, format, &ready_tx) {
                    log::error!("Mic capture error: {}", e);
                    // Ignored if open already returned.
                    let _ = ready_tx.send(Err(e.clone()));
                    *shared.failure.lock() = Some(e);
                }
                shared.running.store(false, Ordering::SeqCst);
                shared.available.notify_all();
            })
            .map_err(|e| RecorderError::Io(format!("failed to spawn mic thread: {}", e)))?;
        self.handle = Some(handle);

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.join_thread();
                Err(e)
            }
            Err(_) => {
                self.join_thread();
                Err(RecorderError::DeviceUnavailable("microphone did not initialize".into()))
            }
        }
    }

    fn min_buffer_size(&self, format: PcmFormat) -> usize {
        // One shared-mode buffer.
        format.byte_rate() as usize / 10
    }

    fn start(&mut self) -> std::result::Result<(), RecorderError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(RecorderError::DeviceUnavailable("microphone not open".into()));
        }
        self.shared.delivering.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), RecorderError> {
        self.shared.delivering.store(false, Ordering::SeqCst);
        self.shared.pcm.lock().clear();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, RecorderError> {
        if let Some(e) = self.shared.failure.lock().take() {
            return Err(e);
        }

        let mut pcm = self.shared.pcm.lock();
        if pcm.is_empty() {
            self.shared.available.wait_for(&mut pcm, READ_WAIT);
        }
        // Whole samples only.
        let n = pcm.len().min(buf.len()) & !1;
        for (dst, src) in buf[..n].iter_mut().zip(pcm.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.shared.delivering.store(false, Ordering::SeqCst);
        self.join_thread();
        self.shared.pcm.lock().clear();
    }
}

impl Drop for WasapiMicDevice {
    fn drop(&mut self) {
        self.join_thread();
    }
}

fn device_error(context: &str, e: Error) -> RecorderError {
    RecorderError::DeviceUnavailable(format!("{} failed: {}", context, e))
}

/// Capture thread body.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Get capture device (default or by ID)
/// 3. Activate IAudioClient and initialize in shared mode
/// 4. Get IAudioCaptureClient, report ready to `open`
/// 5. Register with MMCSS, then poll; the client is started and stopped
///    following the `delivering` flag
fn mic_capture_loop(
    shared: &Shared,
    device_id: Option<String>,
    format: PcmFormat,
    ready: &mpsc::Sender<std::result::Result<(), RecorderError>>,
) -> std::result::Result<(), RecorderError> {
    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| device_error("CoInitializeEx", e))?;
        let _com_guard = CoUninitializeGuard;

        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| device_error("CoCreateInstance(MMDeviceEnumerator)", e))?;

        let device = match device_id {
            Some(ref id) => {
                let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                enumerator
                    .GetDevice(PCWSTR(wide_id.as_ptr()))
                    .map_err(|e| device_error("GetDevice", e))?
            }
            None => enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .map_err(|e| device_error("GetDefaultAudioEndpoint", e))?,
        };

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| device_error("Activate", e))?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| device_error("GetMixFormat", e))?;
        let _format_guard = CoTaskMemGuard(mix_format_ptr as *const _);

        let mix_format = &*mix_format_ptr;
        let sample_rate = mix_format.nSamplesPerSec;
        let channels = mix_format.nChannels;
        if mix_format.wBitsPerSample != 32 {
            return Err(RecorderError::DeviceUnavailable(format!(
                "unsupported mix format: {} bits per sample",
                mix_format.wBitsPerSample
            )));
        }

        audio_client
            .Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_NOPERSIST,
                BUFFER_DURATION,
                0,
                mix_format,
                None,
            )
            .map_err(|e| device_error("IAudioClient::Initialize", e))?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| device_error("GetService", e))?;

        let converter = MicConverter::new(sample_rate, channels, format);
        let max_queued = (format.byte_rate() as u128 * MAX_QUEUED.as_millis() / 1000) as usize;
        log::info!(
            "WASAPI microphone open: {} Hz, {} ch -> {} Hz mono",
            sample_rate,
            channels,
            format.sample_rate
        );
        let _ = ready.send(Ok(()));

        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let _mmcss_handle = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        let mut client_started = false;
        while shared.running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));

            let delivering = shared.delivering.load(Ordering::SeqCst);
            if delivering && !client_started {
                audio_client.Start().map_err(|e| device_error("IAudioClient::Start", e))?;
                client_started = true;
            } else if !delivering && client_started {
                audio_client.Stop().map_err(|e| device_error("IAudioClient::Stop", e))?;
                client_started = false;
            }
            if !client_started {
                continue;
            }

            let mut packet_length = capture_client
                .GetNextPacketSize()
                .map_err(|e| device_error("GetNextPacketSize", e))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(|e| device_error("GetBuffer", e))?;

                if num_frames > 0 && !buffer_ptr.is_null() {
                    let total_samples = num_frames as usize * channels as usize;
                    let pcm = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        converter.convert(&vec![0.0f32; total_samples])
                    } else {
                        let samples = std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples);
                        converter.convert(samples)
                    };

                    let mut queue = shared.pcm.lock();
                    queue.extend(pcm);
                    let overflow = queue.len().saturating_sub(max_queued) & !1;
                    if overflow > 0 {
                        log::debug!("Dropping {} bytes of unread microphone audio", overflow);
                        queue.drain(..overflow);
                    }
                    drop(queue);
                    shared.available.notify_all();
                }

                capture_client
                    .ReleaseBuffer(num_frames)
                    .map_err(|e| device_error("ReleaseBuffer", e))?;

                packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(|e| device_error("GetNextPacketSize", e))?;
            }
        }

        if client_started {
            let _ = audio_client.Stop();
        }
    }

    Ok(())
}

/// RAII guard to call CoUninitialize when dropped.
struct CoUninitializeGuard;

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Frees a COM task allocation (the mix format) when dropped.
struct CoTaskMemGuard(*const std::ffi::c_void);

impl Drop for CoTaskMemGuard {
    fn drop(&mut self) {
        unsafe {
            CoTaskMemFree(Some(self.0));
        }
    }
}
