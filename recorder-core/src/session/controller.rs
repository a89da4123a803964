use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::models::config::{RecorderConfig, RecordingKind, StartRequest};
use crate::models::error::RecorderError;
use crate::models::media::{AudioEncoderConfig, Capability, PcmFormat};
use crate::models::recording_result::{RecordingResult, SessionHandle};
use crate::models::state::SessionStatus;
use crate::pipeline::audio_encode::AudioEncodeLoop;
use crate::pipeline::capture_loop::{AudioCaptureLoop, FaultHandler};
use crate::pipeline::mux::MuxSynchronizer;
use crate::pipeline::threads;
use crate::pipeline::video_encoder::{VideoSettings, VideoSurfaceEncoder};
use crate::session::observers::{ObserverRegistry, SubscriptionId};
use crate::session::timer::{PeriodicTimer, RecordingClock};
use crate::storage::{checksum, naming};
use crate::storage::raw_sink::RawFileSink;
use crate::traits::backend::MediaBackend;
use crate::traits::collaborators::{CatalogRegistrar, PermissionProvider, StorageProvider};
use crate::traits::observer::RecorderObserver;

/// Everything the controller talks to outside the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn MediaBackend>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub storage: Arc<dyn StorageProvider>,
    pub catalog: Arc<dyn CatalogRegistrar>,
}

/// Producers of one session. Every field is optional: a high-quality sound
/// session has only `capture`, a silent screen session only `video` and `mux`.
#[derive(Default)]
struct Pipeline {
    capture: Option<AudioCaptureLoop>,
    audio: Option<AudioEncodeLoop>,
    video: Option<VideoSurfaceEncoder>,
    mux: Option<Arc<MuxSynchronizer>>,
}

impl Pipeline {
    /// Orderly end of stream. Returns the finalized output path.
    fn finish(&mut self, raw_path: &Path, join_timeout: Duration) -> Result<PathBuf, RecorderError> {
        let mut failure = None;

        if let Some(capture) = &self.capture {
            match capture.stop() {
                Ok(()) => {}
                // The encoder still flushes what it has; the container is usable.
                Err(RecorderError::Timeout(msg)) if self.mux.is_some() => {
                    log::warn!("Audio capture did not stop in time: {}", msg);
                }
                Err(e) => failure = Some(e),
            }
        }
        if let Some(video) = &self.video {
            video.stop();
        }

        let output = match &self.mux {
            Some(mux) => mux.finish(join_timeout),
            None => Ok(raw_path.to_path_buf()),
        };

        // Unblocks a drain thread that was leaked by the bounded join.
        if let Some(video) = &self.video {
            video.release();
        }
        if let Some(audio) = &self.audio {
            audio.release();
        }

        match failure {
            Some(e) => Err(e),
            None => output,
        }
    }

    /// Tear everything down without caring about the output.
    fn abort(&mut self, join_timeout: Duration) {
        if let Some(capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                log::warn!("Audio capture teardown: {}", e);
            }
        }
        if let Some(video) = self.video.take() {
            video.release();
        }
        if let Some(audio) = self.audio.take() {
            audio.release();
        }
        if let Some(mux) = self.mux.take() {
            if let Err(e) = mux.finish(join_timeout) {
                log::debug!("Muxer teardown: {}", e);
            }
        }
    }
}

struct ActiveSession {
    handle: SessionHandle,
    request: StartRequest,
    path: PathBuf,
    created_at: DateTime<Local>,
    pipeline: Pipeline,
    clock: RecordingClock,
    paused: bool,
    elapsed_timer: Option<PeriodicTimer>,
    amplitude_timer: Option<PeriodicTimer>,
}

impl ActiveSession {
    fn stop_timers(&mut self, join_timeout: Duration) {
        if let Some(mut timer) = self.elapsed_timer.take() {
            timer.stop(join_timeout);
        }
        if let Some(mut timer) = self.amplitude_timer.take() {
            timer.stop(join_timeout);
        }
    }
}

/// What observers can see: read by `status` and by subscribe replay.
struct StatusBoard {
    status: SessionStatus,
    clock: Option<RecordingClock>,
    last_result: Option<RecordingResult>,
}

struct Shared {
    config: RecorderConfig,
    deps: Collaborators,
    observers: Arc<ObserverRegistry>,
    /// Held for the whole of every start/pause/resume/stop/discard.
    session: Mutex<Option<ActiveSession>>,
    board: Mutex<StatusBoard>,
}

/// Owns at most one recording session and drives it through
/// `ready → recording ⇄ paused → finalizing → ready`.
///
/// ```text
/// sound, high:      [AudioDevice] → [AudioCaptureLoop] → [RawFileSink] → .wav
/// sound, standard:  [AudioDevice] → [AudioCaptureLoop] → [AudioEncodeLoop] → [MuxSynchronizer] → .m4a
/// screen:           [DisplaySource] → [VideoSurfaceEncoder] ──────────────→ [MuxSynchronizer] → .mp4
///                   (+ the standard sound path when recording audio)
/// ```
///
/// All notifications go through subscribed `RecorderObserver`s. An observer
/// callback must not call back into `start`, `pause`, `resume`, `stop` or
/// `discard`; `status` is fine.
pub struct RecordingSessionController {
    shared: Arc<Shared>,
}

impl RecordingSessionController {
    pub fn new(config: RecorderConfig, deps: Collaborators) -> Result<Self, RecorderError> {
        config.validate().map_err(RecorderError::InvalidState)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                deps,
                observers: Arc::new(ObserverRegistry::new()),
                session: Mutex::new(None),
                board: Mutex::new(StatusBoard {
                    status: SessionStatus::Ready,
                    clock: None,
                    last_result: None,
                }),
            }),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.board.lock().status.clone()
    }

    /// The last successfully finalized recording, until it is discarded.
    pub fn last_result(&self) -> Option<RecordingResult> {
        self.shared.board.lock().last_result.clone()
    }

    /// Add an observer. It immediately receives the current status and, if
    /// a session is running, the elapsed seconds.
    pub fn subscribe(&self, observer: Arc<dyn RecorderObserver>) -> SubscriptionId {
        let id = self.shared.observers.subscribe(Arc::clone(&observer));
        let (status, clock) = {
            let board = self.shared.board.lock();
            (board.status.clone(), board.clock.clone())
        };
        observer.on_status_changed(&status);
        if let Some(clock) = clock {
            observer.on_elapsed_time(clock.active_secs());
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Check grants and free space, build the pipeline for `request` and
    /// start it. Transitions: ready → recording.
    ///
    /// Nothing is left running and no file is left behind when this fails.
    pub fn start(&self, request: StartRequest) -> Result<SessionHandle, RecorderError> {
        Shared::start(&self.shared, request)
    }

    /// Transitions: recording → paused.
    pub fn pause(&self, handle: SessionHandle) -> Result<(), RecorderError> {
        self.shared.pause(handle)
    }

    /// Transitions: paused → recording.
    pub fn resume(&self, handle: SessionHandle) -> Result<(), RecorderError> {
        self.shared.resume(handle)
    }

    /// Finalize the output file.
    /// Transitions: recording/paused → finalizing → completed/failed → ready.
    pub fn stop(&self, handle: SessionHandle) -> Result<RecordingResult, RecorderError> {
        self.shared.stop(handle)
    }

    /// Delete the running session's output, or the finalized file of a
    /// finished session together with its catalog entry.
    /// Transitions: … → discarded → ready.
    pub fn discard(&self, handle: SessionHandle) -> Result<(), RecorderError> {
        self.shared.discard(handle)
    }

    /// Finalize a running session as a normal stop, if there is one.
    pub fn shutdown(&self) -> Option<Result<RecordingResult, RecorderError>> {
        let handle = self.shared.session.lock().as_ref().map(|s| s.handle)?;
        log::info!("Shutting down, finalizing active recording");
        Some(self.stop(handle))
    }
}

impl Shared {
    fn set_status(&self, status: SessionStatus) {
        self.board.lock().status = status.clone();
        self.observers.status_changed(&status);
    }

    fn start(self: &Arc<Self>, request: StartRequest) -> Result<SessionHandle, RecorderError> {
        let mut slot = self.session.lock();
        if slot.is_some() {
            return Err(RecorderError::InvalidState("a recording is already in progress".into()));
        }

        self.preflight(&request)?;

        let dir = self.deps.storage.recordings_directory(request.kind)?;
        let created_at = Local::now();
        let path = naming::unique_recording_path(&dir, request.kind, request.file_extension(), created_at.naive_local());
        let handle = SessionHandle::new();
        let join_timeout = self.config.join_timeout;

        let mut pipeline = Pipeline::default();
        if let Err(e) = self.assemble(&mut pipeline, &request, &path, handle) {
            log::error!("Failed to start {:?} recording: {}", request.kind, e);
            pipeline.abort(join_timeout);
            remove_partial(&path);
            return Err(e);
        }

        let clock = RecordingClock::start();
        let mut session = ActiveSession {
            handle,
            request,
            path,
            created_at,
            pipeline,
            clock: clock.clone(),
            paused: false,
            elapsed_timer: None,
            amplitude_timer: None,
        };
        if let Err(e) = self.start_timers(&mut session) {
            session.stop_timers(join_timeout);
            session.pipeline.abort(join_timeout);
            remove_partial(&session.path);
            return Err(e);
        }

        log::info!(
            "Recording {:?} ({:?}, audio: {}) to {}",
            session.request.kind,
            session.request.quality,
            session.request.captures_audio(),
            session.path.display()
        );
        *slot = Some(session);
        self.board.lock().clock = Some(clock);
        self.set_status(SessionStatus::Recording);
        Ok(handle)
    }

    /// Everything that can be checked before a file exists.
    fn preflight(&self, request: &StartRequest) -> Result<(), RecorderError> {
        let permissions = &self.deps.permissions;
        if request.captures_audio() && !permissions.has_permission(Capability::Microphone) {
            return Err(RecorderError::PermissionDenied(Capability::Microphone));
        }
        if self.config.require_phone_state && !permissions.has_permission(Capability::PhoneState) {
            return Err(RecorderError::PermissionDenied(Capability::PhoneState));
        }

        match self.deps.storage.available_space(request.kind) {
            Some(free) if free < self.config.min_free_space_bytes => {
                return Err(RecorderError::StorageExhausted(format!(
                    "{} bytes free, {} required",
                    free, self.config.min_free_space_bytes
                )));
            }
            Some(_) => {}
            None => log::warn!("Free space unknown, starting anyway"),
        }
        Ok(())
    }

    /// Build every producer first, then start capture and the drain
    /// threads, so a drain never waits at the mux barrier for a producer
    /// that does not exist yet.
    fn assemble(
        self: &Arc<Self>,
        pipeline: &mut Pipeline,
        request: &StartRequest,
        path: &Path,
        handle: SessionHandle,
    ) -> Result<(), RecorderError> {
        let config = &self.config;
        let backend = &self.deps.backend;
        let on_fault = self.fault_handler(handle);

        if request.is_wave() {
            let microphone = backend.open_microphone()?;
            let sink = RawFileSink::create(path, PcmFormat::MIC)?;
            let capture = AudioCaptureLoop::new(microphone, Box::new(sink), config.join_timeout)
                .with_fault_handler(on_fault);
            capture.start()?;
            pipeline.capture = Some(capture);
            return Ok(());
        }

        if request.kind == RecordingKind::Screen {
            let display = backend.display_source()?;
            let capabilities = backend.capability_source();
            let settings = VideoSettings {
                frame_rate: config.video_frame_rate,
                key_frame_interval_secs: config.key_frame_interval_secs,
                max_dimension: config.max_dimension,
            };
            let video = VideoSurfaceEncoder::prepare(
                backend.create_video_encoder()?,
                display.as_ref(),
                capabilities.as_deref(),
                settings,
            )?;
            pipeline.video = Some(video.with_fault_handler(on_fault.clone()));
        }

        if request.captures_audio() {
            let audio = AudioEncodeLoop::new(backend.create_audio_encoder()?, &AudioEncoderConfig::aac(config.audio_bitrate))?
                .with_fault_handler(on_fault.clone());
            let capture = AudioCaptureLoop::new(backend.open_microphone()?, audio.input_sink(), config.join_timeout)
                .with_fault_handler(on_fault);
            pipeline.audio = Some(audio);
            pipeline.capture = Some(capture);
        }

        let tracks = usize::from(pipeline.video.is_some()) + usize::from(pipeline.audio.is_some());
        let mux = Arc::new(MuxSynchronizer::new(
            backend.create_container(path),
            tracks,
            config.barrier_timeout,
        ));
        pipeline.mux = Some(Arc::clone(&mux));

        if let Some(capture) = &pipeline.capture {
            capture.start()?;
        }
        if let Some(audio) = &pipeline.audio {
            audio.start_drain(Arc::clone(&mux))?;
        }
        if let Some(video) = &pipeline.video {
            video.start_drain(Arc::clone(&mux))?;
        }
        Ok(())
    }

    fn start_timers(&self, session: &mut ActiveSession) -> Result<(), RecorderError> {
        session.elapsed_timer = Some(self.elapsed_timer(&session.clock)?);

        if let Some(capture) = &session.pipeline.capture {
            let probe = capture.amplitude_probe();
            let observers = Arc::clone(&self.observers);
            let period = self.config.amplitude_tick;
            session.amplitude_timer = Some(PeriodicTimer::start("amplitude-timer", period, period, move || {
                observers.amplitude(probe.read());
            })?);
        }
        Ok(())
    }

    fn elapsed_timer(&self, clock: &RecordingClock) -> Result<PeriodicTimer, RecorderError> {
        let observers = Arc::clone(&self.observers);
        let clock = clock.clone();
        let period = self.config.elapsed_tick;
        PeriodicTimer::start("elapsed-timer", period, period, move || {
            observers.elapsed_time(clock.active_secs());
        })
    }

    /// Worker threads report their own failure here. Teardown joins those
    /// same threads, so it runs on a thread of its own.
    fn fault_handler(self: &Arc<Self>, handle: SessionHandle) -> FaultHandler {
        let shared: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |error: RecorderError| {
            let shared = Weak::clone(&shared);
            let spawned = threads::spawn_named("recording-teardown", move || {
                if let Some(shared) = shared.upgrade() {
                    shared.fail(handle, error);
                }
            });
            if let Err(e) = spawned {
                log::error!("Failed to schedule recording teardown: {}", e);
            }
        })
    }

    fn fail(&self, handle: SessionHandle, error: RecorderError) {
        let mut slot = self.session.lock();
        let Some(session) = slot.take_if(|s| s.handle == handle) else {
            // Already stopped or discarded.
            return;
        };
        log::error!("Recording stopped unexpectedly: {}", error);
        self.abandon(session);
        self.set_status(SessionStatus::Failed(error));
        self.set_status(SessionStatus::Ready);
    }

    /// Stop everything and delete whatever was written.
    fn abandon(&self, mut session: ActiveSession) {
        let join_timeout = self.config.join_timeout;
        session.stop_timers(join_timeout);
        session.pipeline.abort(join_timeout);
        remove_partial(&session.path);
        self.board.lock().clock = None;
    }

    fn pause(&self, handle: SessionHandle) -> Result<(), RecorderError> {
        let mut slot = self.session.lock();
        let session = active_session(&mut slot, handle)?;
        if session.paused {
            return Err(RecorderError::InvalidState("recording is already paused".into()));
        }

        if let Some(capture) = &session.pipeline.capture {
            capture.pause()?;
        }
        if let Some(mut timer) = session.elapsed_timer.take() {
            timer.stop(self.config.join_timeout);
        }
        session.clock.pause();
        session.paused = true;
        log::info!("Recording paused at {}s", session.clock.active_secs());

        self.set_status(SessionStatus::Paused);
        self.observers.amplitude(0);
        Ok(())
    }

    fn resume(&self, handle: SessionHandle) -> Result<(), RecorderError> {
        let mut slot = self.session.lock();
        let session = active_session(&mut slot, handle)?;
        if !session.paused {
            return Err(RecorderError::InvalidState("recording is not paused".into()));
        }

        if let Some(capture) = &session.pipeline.capture {
            capture.resume()?;
        }
        session.clock.resume();
        session.elapsed_timer = Some(self.elapsed_timer(&session.clock)?);
        session.paused = false;
        log::info!("Recording resumed");

        self.set_status(SessionStatus::Recording);
        Ok(())
    }

    fn stop(&self, handle: SessionHandle) -> Result<RecordingResult, RecorderError> {
        let mut slot = self.session.lock();
        active_session(&mut slot, handle)?;
        let Some(session) = slot.take() else {
            return Err(RecorderError::InvalidState("no recording in progress".into()));
        };
        self.set_status(SessionStatus::Finalizing);

        let outcome = self.finalize(session);
        self.board.lock().clock = None;
        match &outcome {
            Ok(result) => {
                self.board.lock().last_result = Some(result.clone());
                self.set_status(SessionStatus::Completed(Box::new(result.clone())));
                self.observers.recording_finished(result);
            }
            Err(e) => {
                log::error!("Failed to finalize recording: {}", e);
                self.set_status(SessionStatus::Failed(e.clone()));
            }
        }
        self.set_status(SessionStatus::Ready);
        outcome
    }

    fn finalize(&self, mut session: ActiveSession) -> Result<RecordingResult, RecorderError> {
        let join_timeout = self.config.join_timeout;
        session.stop_timers(join_timeout);
        let duration_secs = session.clock.active_secs();

        let finished = session
            .pipeline
            .finish(&session.path, join_timeout)
            .and_then(|path| describe_output(&path).map(|(size, checksum)| (path, size, checksum)));
        let (file_path, size_bytes, checksum) = match finished {
            Ok(output) => output,
            Err(e) => {
                remove_partial(&session.path);
                return Err(e);
            }
        };

        let mut result = RecordingResult {
            handle: session.handle,
            kind: session.request.kind,
            file_path,
            mime_type: session.request.mime_type().into(),
            duration_secs,
            size_bytes,
            checksum,
            catalog_id: None,
            created_at: session.created_at.to_rfc3339(),
        };

        // The file stays on disk even if the catalog refuses it.
        match self
            .deps
            .catalog
            .register(&result.file_path, &result.mime_type, &result.display_name())
        {
            Ok(id) => result.catalog_id = Some(id),
            Err(e) => log::warn!("Catalog registration failed for {}: {}", result.file_path.display(), e),
        }

        log::info!(
            "Recording finished: {} ({} bytes, {}s)",
            result.file_path.display(),
            result.size_bytes,
            result.duration_secs
        );
        Ok(result)
    }

    fn discard(&self, handle: SessionHandle) -> Result<(), RecorderError> {
        let mut slot = self.session.lock();
        match slot.as_ref().map(|s| s.handle) {
            Some(active) if active == handle => {
                if let Some(session) = slot.take() {
                    log::info!("Discarding active recording {}", session.path.display());
                    self.abandon(session);
                }
                self.set_status(SessionStatus::Discarded);
                self.set_status(SessionStatus::Ready);
                return Ok(());
            }
            Some(_) => return Err(RecorderError::InvalidState("unknown session handle".into())),
            None => {}
        }

        let finished = self.board.lock().last_result.take_if(|r| r.handle == handle);
        let Some(result) = finished else {
            return Err(RecorderError::InvalidState("no recording to discard for this handle".into()));
        };

        match fs::remove_file(&result.file_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                // Keep it discardable.
                self.board.lock().last_result = Some(result);
                return Err(RecorderError::io("failed to delete recording", e));
            }
        }
        if let Some(id) = &result.catalog_id {
            if let Err(e) = self.deps.catalog.unregister(id) {
                log::warn!("Failed to remove catalog entry {}: {}", id, e);
            }
        }
        log::info!("Discarded {}", result.file_path.display());

        self.set_status(SessionStatus::Discarded);
        self.set_status(SessionStatus::Ready);
        Ok(())
    }
}

fn active_session(slot: &mut Option<ActiveSession>, handle: SessionHandle) -> Result<&mut ActiveSession, RecorderError> {
    match slot.as_mut() {
        Some(session) if session.handle == handle => Ok(session),
        Some(_) => Err(RecorderError::InvalidState("unknown session handle".into())),
        None => Err(RecorderError::InvalidState("no recording in progress".into())),
    }
}

fn describe_output(path: &Path) -> Result<(u64, String), RecorderError> {
    let size = fs::metadata(path)
        .map_err(|e| RecorderError::io("failed to stat recording", e))?
        .len();
    Ok((size, checksum::sha256_file(path)?))
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::info!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}
