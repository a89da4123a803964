use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::RecorderError;
use crate::models::media::{EncodedSample, TrackFormat};
use crate::models::state::MuxState;
use crate::pipeline::threads;
use crate::traits::container::ContainerWriter;

struct MuxInner {
    container: Box<dyn ContainerWriter>,
    state: MuxState,
    expected: usize,
    registered: usize,
    samples_written: u64,
    /// Set by `finish` once the drains are joined or a join timed out;
    /// wakes producers still waiting at the barrier.
    closing: bool,
    /// The container refused to start; every waiter gets this error.
    failed: Option<RecorderError>,
}

impl MuxInner {
    fn start_if_complete(&mut self) -> Result<bool, RecorderError> {
        if self.registered == 0 || self.registered < self.expected {
            return Ok(false);
        }
        if let Err(e) = self.container.start() {
            log::error!("Failed to start muxer: {}", e);
            self.failed = Some(e.clone());
            return Err(e);
        }
        self.state = MuxState::Started;
        log::info!("Muxer started with {} track(s)", self.registered);
        Ok(true)
    }
}

/// Single container writer shared by the audio and video drain threads.
///
/// The container must know every track before the first sample, so
/// `register_track` is a barrier: a producer registering first blocks until
/// the expected number of tracks have registered, one was declared
/// unavailable, or `barrier_timeout` elapses.
///
/// ```text
/// empty → tracks_pending → started → stopped
/// ```
pub struct MuxSynchronizer {
    inner: Mutex<MuxInner>,
    ready: Condvar,
    drains: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    barrier_timeout: Duration,
}

impl MuxSynchronizer {
    /// `expected_tracks` is 2 when audio is recorded next to video, else 1.
    pub fn new(container: Box<dyn ContainerWriter>, expected_tracks: usize, barrier_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(MuxInner {
                container,
                state: MuxState::Empty,
                expected: expected_tracks,
                registered: 0,
                samples_written: 0,
                closing: false,
                failed: None,
            }),
            ready: Condvar::new(),
            drains: Mutex::new(Vec::new()),
            barrier_timeout,
        }
    }

    pub fn state(&self) -> MuxState {
        self.inner.lock().state
    }

    pub fn expected_tracks(&self) -> usize {
        self.inner.lock().expected
    }

    pub fn samples_written(&self) -> u64 {
        self.inner.lock().samples_written
    }

    /// Declare a track and wait until the container has started.
    pub fn register_track(&self, format: &TrackFormat) -> Result<usize, RecorderError> {
        let mut inner = self.inner.lock();
        match inner.state {
            MuxState::Started | MuxState::Stopped => {
                return Err(RecorderError::MuxerSequence("track registered after muxer start".into()));
            }
            MuxState::Empty | MuxState::TracksPending => {}
        }
        if let Some(e) = &inner.failed {
            return Err(e.clone());
        }
        if inner.closing {
            return Err(RecorderError::InvalidState("muxer is finishing".into()));
        }

        let index = inner.container.add_track(format)?;
        inner.registered += 1;
        log::info!(
            "Registered {:?} track {} ({}/{})",
            format.kind(),
            index,
            inner.registered,
            inner.expected
        );

        match inner.start_if_complete() {
            Ok(true) => {
                drop(inner);
                self.ready.notify_all();
                return Ok(index);
            }
            Ok(false) => {}
            Err(e) => {
                drop(inner);
                self.ready.notify_all();
                return Err(e);
            }
        }

        inner.state = MuxState::TracksPending;
        let deadline = Instant::now() + self.barrier_timeout;
        while inner.state == MuxState::TracksPending && !inner.closing && inner.failed.is_none() {
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }

        if inner.state == MuxState::Started {
            return Ok(index);
        }
        if let Some(e) = &inner.failed {
            return Err(e.clone());
        }
        if inner.closing {
            return Err(RecorderError::InvalidState(
                "muxer finished before all tracks registered".into(),
            ));
        }
        Err(RecorderError::Timeout(format!(
            "waited {:?} for {} more track(s)",
            self.barrier_timeout,
            inner.expected.saturating_sub(inner.registered)
        )))
    }

    /// A producer will never register (e.g. its encoder failed). Starts the
    /// container if everyone else is already waiting.
    pub fn mark_track_unavailable(&self) {
        let mut inner = self.inner.lock();
        if inner.state != MuxState::Empty && inner.state != MuxState::TracksPending {
            return;
        }
        if inner.failed.is_some() {
            return;
        }
        inner.expected = inner.expected.saturating_sub(1);
        log::warn!("Track marked unavailable, expecting {}", inner.expected);
        if !matches!(inner.start_if_complete(), Ok(false)) {
            drop(inner);
            self.ready.notify_all();
        }
    }

    /// Serialized sample write. The container must have started.
    pub fn write_sample(&self, track: usize, sample: &EncodedSample) -> Result<(), RecorderError> {
        let mut inner = self.inner.lock();
        if inner.state != MuxState::Started {
            return Err(RecorderError::MuxerSequence("muxer hasn't started".into()));
        }
        inner.container.write_sample(track, sample)?;
        inner.samples_written += 1;
        Ok(())
    }

    /// Hand over a drain thread so `finish` can join it.
    pub fn attach_drain(&self, name: &'static str, handle: JoinHandle<()>) {
        self.drains.lock().push((name, handle));
    }

    /// Join the drain threads (bounded), then finalize the container.
    ///
    /// Producers must have been told to end their streams; a drain that is
    /// still flushing may register its track while it is being joined. Only
    /// a drain that outlives its join is released from the barrier. Fails
    /// when the container never started or nothing was written.
    pub fn finish(&self, join_timeout: Duration) -> Result<PathBuf, RecorderError> {
        let drains = std::mem::take(&mut *self.drains.lock());
        for (name, handle) in drains {
            if !threads::join_with_timeout(handle, join_timeout, name) {
                self.close_barrier();
            }
        }
        self.close_barrier();

        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = MuxState::Stopped;
        match previous {
            MuxState::Started => {}
            MuxState::Stopped => {
                return Err(RecorderError::MuxerSequence("muxer already finished".into()));
            }
            MuxState::Empty | MuxState::TracksPending => {
                return Err(RecorderError::MuxerSequence("muxer never started".into()));
            }
        }

        inner.container.stop()?;
        log::info!("Muxer finished ({} samples)", inner.samples_written);
        Ok(inner.container.path().to_path_buf())
    }

    fn close_barrier(&self) {
        self.inner.lock().closing = true;
        self.ready.notify_all();
    }
}
