use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::error::RecorderError;
use crate::models::media::PcmFormat;
use crate::models::state::CaptureLoopState;
use crate::pipeline::pause_gate::PauseGate;
use crate::pipeline::threads;
use crate::processing::levels;
use crate::traits::audio_device::AudioDevice;

/// Destination for captured PCM frames.
///
/// Implemented by:
/// - `RawFileSink` (headerless PCM on disk, wrapped into WAV on finish)
/// - `EncoderSink` (feeds the compressed audio encoder)
pub trait PcmSink: Send {
    /// Append one frame. Called from the capture thread only.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), RecorderError>;

    /// Flush and finalize. Called once, after the capture thread exited.
    fn finish(&mut self) -> Result<(), RecorderError>;
}

/// Invoked from a worker thread when it stops on its own because of an error.
pub type FaultHandler = Arc<dyn Fn(RecorderError) + Send + Sync>;

/// Frame buffer size for a device minimum, rounded up to whole KiB with headroom.
pub fn frame_buffer_size(min_buffer_size: usize) -> usize {
    ((min_buffer_size / 1024) + 1) * 1024 * 2
}

/// Clonable read-only view of the loop's input level.
#[derive(Clone)]
pub struct AmplitudeProbe {
    state: Arc<Mutex<CaptureLoopState>>,
    last_frame: Arc<Mutex<Vec<u8>>>,
}

impl AmplitudeProbe {
    /// RMS over the last captured frame; 0 unless recording.
    pub fn read(&self) -> u32 {
        if *self.state.lock() != CaptureLoopState::Recording {
            return 0;
        }
        // Copy out so the capture thread is not held up by the math.
        let frame = self.last_frame.lock().clone();
        levels::rms_amplitude(&frame)
    }
}

/// Owns a microphone handle and pulls PCM frames on a dedicated thread.
///
/// ```text
/// [AudioDevice] --read--> [frame buffer] --write_frame--> [PcmSink]
///                              |
///                         last_frame --> current_amplitude()
/// ```
///
/// Pause keeps the device open: the pause gate parks the capture thread
/// between frames and the device is stopped, then restarted on resume.
pub struct AudioCaptureLoop {
    device: Arc<Mutex<Box<dyn AudioDevice>>>,
    sink: Arc<Mutex<Box<dyn PcmSink>>>,
    format: PcmFormat,
    gate: Arc<PauseGate>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<CaptureLoopState>>,
    last_frame: Arc<Mutex<Vec<u8>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
    on_fault: Option<FaultHandler>,
}

impl AudioCaptureLoop {
    pub fn new(device: Box<dyn AudioDevice>, sink: Box<dyn PcmSink>, join_timeout: Duration) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            sink: Arc::new(Mutex::new(sink)),
            format: PcmFormat::MIC,
            gate: Arc::new(PauseGate::new()),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(CaptureLoopState::Idle)),
            last_frame: Arc::new(Mutex::new(Vec::new())),
            handle: Mutex::new(None),
            join_timeout,
            on_fault: None,
        }
    }

    /// Called when the capture thread stops because of a read or sink error.
    pub fn with_fault_handler(mut self, handler: FaultHandler) -> Self {
        self.on_fault = Some(handler);
        self
    }

    pub fn state(&self) -> CaptureLoopState {
        *self.state.lock()
    }

    /// Open the device and spawn the capture thread. Transitions: idle → recording.
    pub fn start(&self) -> Result<(), RecorderError> {
        if self.state() != CaptureLoopState::Idle {
            return Err(RecorderError::InvalidState("capture loop already started".into()));
        }

        let buffer_size = {
            let mut device = self.device.lock();
            device.open(self.format)?;
            let size = frame_buffer_size(device.min_buffer_size(self.format));
            if let Err(e) = device.start() {
                device.close();
                return Err(e);
            }
            size
        };

        self.running.store(true, Ordering::SeqCst);
        *self.state.lock() = CaptureLoopState::Recording;

        let device = Arc::clone(&self.device);
        let sink = Arc::clone(&self.sink);
        let gate = Arc::clone(&self.gate);
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let last_frame = Arc::clone(&self.last_frame);
        let on_fault = self.on_fault.clone();

        let spawned = threads::spawn_named("audio-capture", move || {
            let mut buf = vec![0u8; buffer_size];
            let mut fault = None;

            while running.load(Ordering::SeqCst) {
                let Some(_permit) = gate.enter() else {
                    break;
                };
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let n = match device.lock().read(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        log::error!("Audio capture read failed: {}", e);
                        fault = Some(e);
                        break;
                    }
                };
                if n == 0 {
                    continue;
                }

                {
                    let mut last = last_frame.lock();
                    last.clear();
                    last.extend_from_slice(&buf[..n]);
                }

                if let Err(e) = sink.lock().write_frame(&buf[..n]) {
                    log::error!("Failed to write audio frame: {}", e);
                    fault = Some(e);
                    break;
                }
            }

            if let Some(e) = fault {
                running.store(false, Ordering::SeqCst);
                *state.lock() = CaptureLoopState::Stopped;
                if let Some(handler) = on_fault {
                    handler(e);
                }
            }
        });

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                log::info!("Audio capture started ({} byte frames)", buffer_size);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                *self.state.lock() = CaptureLoopState::Stopped;
                let mut device = self.device.lock();
                let _ = device.stop();
                device.close();
                Err(e)
            }
        }
    }

    /// Park the capture thread between frames and stop the device, keeping
    /// it open. Returns false if not recording.
    pub fn pause(&self) -> Result<bool, RecorderError> {
        if self.state() != CaptureLoopState::Recording {
            return Ok(false);
        }
        if !self.gate.pause() {
            return Ok(false);
        }
        if let Err(e) = self.device.lock().stop() {
            self.gate.resume();
            return Err(e);
        }
        *self.state.lock() = CaptureLoopState::Paused;
        self.last_frame.lock().clear();
        log::info!("Audio capture paused");
        Ok(true)
    }

    /// Restart the device and release the capture thread. Returns false if not paused.
    pub fn resume(&self) -> Result<bool, RecorderError> {
        if self.state() != CaptureLoopState::Paused {
            return Ok(false);
        }
        self.device.lock().start()?;
        *self.state.lock() = CaptureLoopState::Recording;
        self.gate.resume();
        log::info!("Audio capture resumed");
        Ok(true)
    }

    /// Stop the thread, close the device, and finalize the sink.
    ///
    /// Idempotent: a second call, or a call on a loop that never started,
    /// does nothing. The capture thread join is bounded; a thread still
    /// blocked in a device read after the timeout is logged and leaked.
    pub fn stop(&self) -> Result<(), RecorderError> {
        *self.state.lock() = CaptureLoopState::Stopped;
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::SeqCst);
        self.gate.close();
        let joined = threads::join_with_timeout(handle, self.join_timeout, "audio-capture");

        match self.device.try_lock_for(self.join_timeout) {
            Some(mut device) => {
                if let Err(e) = device.stop() {
                    log::warn!("Failed to stop audio device: {}", e);
                }
                device.close();
            }
            None => log::warn!("Audio device still busy in a read, not closing it"),
        }

        if !joined {
            return Err(RecorderError::Timeout("audio capture thread did not exit".into()));
        }

        self.last_frame.lock().clear();
        self.sink.lock().finish()
    }

    /// RMS over the last captured frame; 0 while paused.
    pub fn current_amplitude(&self) -> u32 {
        self.amplitude_probe().read()
    }

    pub fn amplitude_probe(&self) -> AmplitudeProbe {
        AmplitudeProbe {
            state: Arc::clone(&self.state),
            last_frame: Arc::clone(&self.last_frame),
        }
    }
}

impl Drop for AudioCaptureLoop {
    fn drop(&mut self) {
        if self.handle.lock().is_some() {
            if let Err(e) = self.stop() {
                log::error!("Audio capture teardown failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::memory::MemoryAudioDevice;
    use std::thread;

    #[derive(Default, Clone)]
    struct CollectSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        finished: Arc<AtomicBool>,
        fail_writes: bool,
    }

    impl PcmSink for CollectSink {
        fn write_frame(&mut self, frame: &[u8]) -> Result<(), RecorderError> {
            if self.fail_writes {
                return Err(RecorderError::StorageExhausted("disk full".into()));
            }
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }

        fn finish(&mut self) -> Result<(), RecorderError> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    fn tone(level: i16, samples: usize) -> Vec<u8> {
        (0..samples).flat_map(|_| level.to_le_bytes()).collect()
    }

    #[test]
    fn buffer_size_is_rounded_up() {
        assert_eq!(frame_buffer_size(0), 2048);
        assert_eq!(frame_buffer_size(3528), 8192);
        assert_eq!(frame_buffer_size(4096), 10240);
    }

    #[test]
    fn captures_all_frames_and_finishes_sink() {
        let device = MemoryAudioDevice::with_frames(vec![vec![1u8; 1024]; 5]);
        let probe = device.probe();
        let sink = CollectSink::default();
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(sink.clone()), Duration::from_secs(1));

        capture.start().unwrap();
        assert_eq!(capture.state(), CaptureLoopState::Recording);
        wait_for(|| probe.frames_remaining() == 0);
        wait_for(|| sink.frames.lock().len() == 5);

        capture.stop().unwrap();
        assert_eq!(capture.state(), CaptureLoopState::Stopped);
        assert!(sink.finished.load(Ordering::SeqCst));
        assert!(probe.is_closed());
        assert_eq!(sink.frames.lock().iter().map(Vec::len).sum::<usize>(), 5120);
    }

    #[test]
    fn stop_is_idempotent() {
        let device = MemoryAudioDevice::with_frames(Vec::new());
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(CollectSink::default()), Duration::from_secs(1));
        capture.stop().unwrap();
        capture.start().unwrap_err();

        let device = MemoryAudioDevice::with_frames(Vec::new());
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(CollectSink::default()), Duration::from_secs(1));
        capture.start().unwrap();
        capture.stop().unwrap();
        capture.stop().unwrap();
    }

    #[test]
    fn refused_open_is_device_unavailable() {
        let device = MemoryAudioDevice::refusing_open();
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(CollectSink::default()), Duration::from_secs(1));
        assert!(matches!(capture.start(), Err(RecorderError::DeviceUnavailable(_))));
        assert_eq!(capture.state(), CaptureLoopState::Idle);
    }

    #[test]
    fn pause_and_resume_keep_device_open() {
        let device = MemoryAudioDevice::with_frames(vec![tone(1000, 512); 3]).looping();
        let probe = device.probe();
        let sink = CollectSink::default();
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(sink.clone()), Duration::from_secs(1));

        assert!(!capture.resume().unwrap());
        capture.start().unwrap();
        wait_for(|| capture.current_amplitude() == 1000);

        assert!(capture.pause().unwrap());
        assert!(!capture.pause().unwrap());
        assert_eq!(capture.state(), CaptureLoopState::Paused);
        assert_eq!(capture.current_amplitude(), 0);
        assert!(!probe.is_started());
        assert!(!probe.is_closed());

        let frames_while_paused = sink.frames.lock().len();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.frames.lock().len(), frames_while_paused);

        assert!(capture.resume().unwrap());
        assert!(probe.is_started());
        wait_for(|| sink.frames.lock().len() > frames_while_paused);

        capture.stop().unwrap();
        assert!(probe.is_closed());
    }

    #[test]
    fn stop_while_paused_releases_thread() {
        let device = MemoryAudioDevice::with_frames(vec![tone(10, 64)]).looping();
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(CollectSink::default()), Duration::from_secs(1));
        capture.start().unwrap();
        capture.pause().unwrap();
        capture.stop().unwrap();
        assert_eq!(capture.state(), CaptureLoopState::Stopped);
    }

    #[test]
    fn read_error_stops_loop_and_reports_fault() {
        let device = MemoryAudioDevice::with_frames(vec![vec![0u8; 256]; 2]).failing_after(1);
        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&faults);
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(CollectSink::default()), Duration::from_secs(1))
            .with_fault_handler(Arc::new(move |e| seen.lock().push(e)));

        capture.start().unwrap();
        wait_for(|| capture.state() == CaptureLoopState::Stopped);
        assert_eq!(faults.lock().len(), 1);
        assert!(matches!(faults.lock()[0], RecorderError::DeviceUnavailable(_)));
        capture.stop().unwrap();
    }

    #[test]
    fn sink_error_reports_fault() {
        let device = MemoryAudioDevice::with_frames(vec![vec![0u8; 256]]);
        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&faults);
        let sink = CollectSink {
            fail_writes: true,
            ..Default::default()
        };
        let capture = AudioCaptureLoop::new(Box::new(device), Box::new(sink), Duration::from_secs(1))
            .with_fault_handler(Arc::new(move |e| seen.lock().push(e)));

        capture.start().unwrap();
        wait_for(|| !faults.lock().is_empty());
        assert!(matches!(faults.lock()[0], RecorderError::StorageExhausted(_)));
    }
}
