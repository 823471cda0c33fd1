//! The processing loop
//!
//! One dedicated thread repeatedly captures a frame, runs the transform,
//! meters, and plays the result back. The thread exclusively owns both
//! frames and both devices for the whole run; the controller only flips
//! the shared `running` flag. Devices are closed by the thread itself when
//! it leaves the loop.
//!
//! ```text
//!   Idle --start()--> Running --stop()--> Stopping --devices closed--> Idle
//!                        |                                             ^
//!                        +------ end of stream / device failure -------+
//! ```
//!
//! Configuration, device binding and transform changes are only accepted
//! while Idle.

use crossbeam_channel::{bounded, Receiver, SendError, Sender};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{CaptureSource, FillOutcome, PlaybackSink};
use crate::audio::frame::{AudioFrame, FrameSnapshot};
use crate::audio::meter::LevelMeter;
use crate::audio::monitor::MonitorHandle;
use crate::audio::transform::{FrameTransform, Passthrough};
use crate::codec::{PcmDecoder, PcmEncoder, SampleFormat};
use crate::config::{AppConfig, PipelineConfig};
use crate::error::{AudioError, Error, PipelineError, Result};

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Running,
    /// Stop requested, the in-flight iteration and device release are finishing
    Stopping,
}

impl ProcessorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// Why a run ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called
    Stopped,
    /// The capture source ran out of data
    EndOfStream,
}

/// Sent once per run when the loop exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorEvent {
    Finished(StopReason),
    DeviceFailure(String),
    TransformPanicked(String),
}

/// Cloneable, thread-safe handle that can stop a running loop.
/// The processor itself stays with whoever owns it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the loop to stop after the in-flight iteration. Does not block.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::debug!("Stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Running totals since the processor was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub frames_processed: u64,
    pub samples_clamped: u64,
    pub runs: u64,
}

#[derive(Default)]
struct Counters {
    frames_processed: AtomicU64,
    samples_clamped: AtomicU64,
    runs: AtomicU64,
}

struct Devices {
    source: Box<dyn CaptureSource>,
    sink: Box<dyn PlaybackSink>,
}

struct WorkerExit {
    transform: Box<dyn FrameTransform>,
    result: Result<StopReason>,
}

/// `None` when the thread was spawned but never handed a run
type WorkerHandle = JoinHandle<Option<WorkerExit>>;

fn spawn_worker_thread(handoff: Receiver<Worker>) -> io::Result<WorkerHandle> {
    thread::Builder::new()
        .name("audio-processor".into())
        .spawn(move || handoff.recv().ok().map(Worker::run))
}

/// Owns the loop thread and its configuration
pub struct AudioProcessor {
    config: PipelineConfig,
    meter: LevelMeter,
    drain_each_frame: bool,

    devices: Option<Devices>,
    /// Moved into the worker while running, handed back when it exits
    transform: Option<Box<dyn FrameTransform>>,

    /// Only state shared with the worker besides the monitor slot
    running: Arc<AtomicBool>,
    worker: Option<WorkerHandle>,

    monitor: MonitorHandle,
    counters: Arc<Counters>,
    event_tx: Sender<ProcessorEvent>,
    event_rx: Receiver<ProcessorEvent>,
}

impl AudioProcessor {
    /// Create an idle processor with a passthrough transform
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, event_rx) = bounded(16);

        Ok(Self {
            config,
            meter: LevelMeter::default(),
            drain_each_frame: false,
            devices: None,
            transform: Some(Box::new(Passthrough)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            monitor: MonitorHandle::new(0),
            counters: Arc::new(Counters::default()),
            event_tx,
            event_rx,
        })
    }

    /// Create a processor from the full application config
    pub fn from_app_config(app: &AppConfig) -> Result<Self> {
        let mut processor = Self::new(app.pipeline)?;
        processor.meter = LevelMeter::new(app.monitor.meter_floor_dbfs);
        processor.drain_each_frame = app.playback.drain_each_frame;
        processor.monitor = MonitorHandle::new(app.monitor.history_frames);
        Ok(processor)
    }

    pub fn state(&self) -> ProcessorState {
        match &self.worker {
            None => ProcessorState::Idle,
            Some(handle) if handle.is_finished() => ProcessorState::Idle,
            Some(_) if self.running.load(Ordering::Acquire) => ProcessorState::Running,
            Some(_) => ProcessorState::Stopping,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn has_devices(&self) -> bool {
        self.devices.is_some()
    }

    fn require_idle(&self, action: &'static str) -> Result<()> {
        match self.state() {
            ProcessorState::Idle => Ok(()),
            state => Err(PipelineError::InvalidStateTransition {
                state: state.as_str(),
                action,
            }
            .into()),
        }
    }

    /// Replace the whole pipeline format
    pub fn set_config(&mut self, config: PipelineConfig) -> Result<()> {
        self.require_idle("reconfigure")?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Change the frame size; frames are rebuilt on the next start
    pub fn set_frame_size(&mut self, frame_size: usize) -> Result<()> {
        self.set_config(self.config.with_frame_size(frame_size))
    }

    /// Bind the devices for the next run. They are closed when that run ends.
    pub fn bind_devices<S, P>(&mut self, source: S, sink: P) -> Result<()>
    where
        S: CaptureSource + 'static,
        P: PlaybackSink + 'static,
    {
        self.require_idle("bind devices")?;
        self.devices = Some(Devices {
            source: Box::new(source),
            sink: Box::new(sink),
        });
        Ok(())
    }

    pub fn set_transform<T: FrameTransform + 'static>(&mut self, transform: T) -> Result<()> {
        self.require_idle("replace transform")?;
        self.reap();
        self.transform = Some(Box::new(transform));
        Ok(())
    }

    pub fn set_drain_each_frame(&mut self, drain_each_frame: bool) -> Result<()> {
        self.require_idle("change drain policy")?;
        self.drain_each_frame = drain_each_frame;
        Ok(())
    }

    /// Configure, bind and start in one call
    pub fn start_with<S, P>(&mut self, config: PipelineConfig, source: S, sink: P) -> Result<()>
    where
        S: CaptureSource + 'static,
        P: PlaybackSink + 'static,
    {
        self.set_config(config)?;
        self.bind_devices(source, sink)?;
        self.start()
    }

    /// Spawn the loop thread
    pub fn start(&mut self) -> Result<()> {
        self.start_on(spawn_worker_thread)
    }

    /// Devices and transform only move into the run once the thread exists,
    /// so a failed spawn leaves both bound for the next attempt.
    fn start_on<F>(&mut self, spawn: F) -> Result<()>
    where
        F: FnOnce(Receiver<Worker>) -> io::Result<WorkerHandle>,
    {
        self.require_idle("start")?;
        self.reap();

        let format = self.config.sample_format()?;
        if self.devices.is_none() {
            return Err(PipelineError::DeviceNotBound.into());
        }

        let (handoff_tx, handoff_rx) = bounded::<Worker>(1);
        let handle = spawn(handoff_rx).map_err(|e| {
            tracing::error!("Failed to spawn audio processor thread: {}", e);
            Error::Io(e)
        })?;

        let devices = self.devices.take().ok_or(PipelineError::DeviceNotBound)?;
        let transform = self
            .transform
            .take()
            .unwrap_or_else(|| Box::new(Passthrough));

        self.monitor.reset();
        while self.event_rx.try_recv().is_ok() {}

        let worker = Worker {
            config: self.config,
            format,
            meter: self.meter,
            drain_each_frame: self.drain_each_frame,
            devices,
            transform,
            running: self.running.clone(),
            monitor: self.monitor.clone(),
            counters: self.counters.clone(),
            event_tx: self.event_tx.clone(),
        };

        tracing::info!(
            "Starting audio processor: {} Hz, {}-bit, {} samples/frame ({:.1} ms)",
            self.config.sample_rate_hz,
            self.config.bits_per_sample,
            self.config.frame_size,
            self.config.frame_duration().as_secs_f64() * 1000.0
        );

        self.running.store(true, Ordering::Release);
        if let Err(SendError(worker)) = handoff_tx.send(worker) {
            self.running.store(false, Ordering::Release);
            self.devices = Some(worker.devices);
            self.transform = Some(worker.transform);
            let _ = handle.join();
            return Err(PipelineError::WorkerPanicked.into());
        }

        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        self.worker = Some(handle);
        Ok(())
    }

    /// Ask the loop to stop after the in-flight iteration. Does not block.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Handle for stopping the loop from another thread, signal handler or task
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    /// Block until the loop thread has exited and report how the run ended.
    /// Returns `None` if there is no run to report.
    pub fn wait(&mut self) -> Result<Option<StopReason>> {
        match self.worker.take() {
            Some(handle) => self.finish(handle).map(Some),
            None => Ok(None),
        }
    }

    /// Non-blocking [`wait`](Self::wait): `None` while the loop is still going
    pub fn try_wait(&mut self) -> Option<Result<StopReason>> {
        if !self.worker.as_ref().is_some_and(|h| h.is_finished()) {
            return None;
        }
        let handle = self.worker.take()?;
        Some(self.finish(handle))
    }

    /// Request a stop and wait for it
    pub fn stop_and_wait(&mut self) -> Result<Option<StopReason>> {
        self.stop();
        self.wait()
    }

    fn finish(&mut self, handle: WorkerHandle) -> Result<StopReason> {
        match handle.join() {
            Ok(Some(exit)) => {
                self.transform = Some(exit.transform);
                exit.result
            }
            Ok(None) | Err(_) => {
                self.running.store(false, Ordering::Release);
                self.transform = Some(Box::new(Passthrough));
                Err(PipelineError::WorkerPanicked.into())
            }
        }
    }

    /// Join a finished worker whose outcome nobody collected
    fn reap(&mut self) {
        if let Some(handle) = self.worker.take() {
            match self.finish(handle) {
                Ok(reason) => tracing::debug!("Discarding uncollected run outcome: {:?}", reason),
                Err(e) => tracing::debug!("Discarding uncollected run error: {}", e),
            }
        }
    }

    /// Receiver for termination events. Clones share one queue.
    pub fn events(&self) -> Receiver<ProcessorEvent> {
        self.event_rx.clone()
    }

    /// Read handle for monitoring consumers
    pub fn monitor(&self) -> MonitorHandle {
        self.monitor.clone()
    }

    pub fn snapshot_input(&self) -> FrameSnapshot {
        self.monitor.snapshot_input()
    }

    pub fn snapshot_output(&self) -> FrameSnapshot {
        self.monitor.snapshot_output()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            frames_processed: self.counters.frames_processed.load(Ordering::Relaxed),
            samples_clamped: self.counters.samples_clamped.load(Ordering::Relaxed),
            runs: self.counters.runs.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioProcessor {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Everything the loop thread owns for one run
struct Worker {
    config: PipelineConfig,
    format: SampleFormat,
    meter: LevelMeter,
    drain_each_frame: bool,
    devices: Devices,
    transform: Box<dyn FrameTransform>,
    running: Arc<AtomicBool>,
    monitor: MonitorHandle,
    counters: Arc<Counters>,
    event_tx: Sender<ProcessorEvent>,
}

/// Clears the shared flag however the worker leaves `run`
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum Step {
    Continue,
    EndOfStream,
}

impl Worker {
    fn run(mut self) -> WorkerExit {
        let _running = RunningGuard(self.running.clone());
        let frame_size = self.config.frame_size;
        let mut input = AudioFrame::new(frame_size);
        let mut output = AudioFrame::new(frame_size);
        let mut decoder = PcmDecoder::new(self.format);
        let mut encoder = PcmEncoder::new(self.format, frame_size);
        let mut bytes = vec![0u8; self.config.frame_bytes()];

        let mut clamp_warned = false;

        let mut result: Result<StopReason> = loop {
            if !self.running.load(Ordering::Acquire) {
                break Ok(StopReason::Stopped);
            }
            match self.iterate(
                &mut bytes,
                &mut input,
                &mut output,
                &mut decoder,
                &mut encoder,
                &mut clamp_warned,
            ) {
                Ok(Step::Continue) => {}
                Ok(Step::EndOfStream) => break Ok(StopReason::EndOfStream),
                Err(e) => break Err(e),
            }
        };

        self.running.store(false, Ordering::Release);

        if result.is_ok() && !self.drain_each_frame {
            if let Err(e) = self.devices.sink.drain() {
                result = Err(e.into());
            }
        }
        self.release_devices();

        let event = match &result {
            Ok(reason) => {
                tracing::info!(
                    "Audio processor finished ({:?}) after {} frames",
                    reason,
                    decoder.stats().frames_decoded
                );
                ProcessorEvent::Finished(*reason)
            }
            Err(Error::Pipeline(PipelineError::TransformPanicked(msg))) => {
                tracing::error!("Frame transform panicked, processor stopped: {}", msg);
                ProcessorEvent::TransformPanicked(msg.clone())
            }
            Err(e) => {
                tracing::error!("Audio device failure, processor stopped: {}", e);
                ProcessorEvent::DeviceFailure(e.to_string())
            }
        };
        let _ = self.event_tx.try_send(event);

        WorkerExit {
            transform: self.transform,
            result,
        }
    }

    fn iterate(
        &mut self,
        bytes: &mut [u8],
        input: &mut AudioFrame,
        output: &mut AudioFrame,
        decoder: &mut PcmDecoder,
        encoder: &mut PcmEncoder,
        clamp_warned: &mut bool,
    ) -> Result<Step> {
        // Capture
        match self.devices.source.fill(bytes)? {
            FillOutcome::EndOfStream => return Ok(Step::EndOfStream),
            FillOutcome::Filled(n) if n != bytes.len() => {
                return Err(AudioError::ShortRead {
                    expected: bytes.len(),
                    got: n,
                }
                .into());
            }
            FillOutcome::Filled(_) => {}
        }
        decoder
            .decode_frame(bytes, input.samples_mut())
            .map_err(AudioError::from)?;

        // Transform. A panic here ends the run instead of the thread.
        let transform = &mut self.transform;
        panic::catch_unwind(AssertUnwindSafe(|| transform.process(input, output)))
            .map_err(|payload| PipelineError::TransformPanicked(panic_message(&*payload)))?;

        // Meter
        input.set_loudness_dbfs(self.meter.compute(input.samples()));

        // Playback
        let clamped = output.clamp();
        if clamped > 0 {
            self.counters
                .samples_clamped
                .fetch_add(clamped as u64, Ordering::Relaxed);
            if *clamp_warned {
                tracing::trace!("Clamped {} out-of-range samples", clamped);
            } else {
                tracing::warn!(
                    "Transform produced {} out-of-range samples, clamping to [-1.0, 1.0]",
                    clamped
                );
                *clamp_warned = true;
            }
        }
        output.set_loudness_dbfs(self.meter.compute(output.samples()));

        let encoded = encoder
            .encode_frame(output.samples())
            .map_err(AudioError::from)?;
        self.devices.sink.write(encoded)?;
        if self.drain_each_frame {
            self.devices.sink.drain()?;
        }

        self.monitor.publish(input, output);
        self.counters.frames_processed.fetch_add(1, Ordering::Relaxed);
        Ok(Step::Continue)
    }

    fn release_devices(&mut self) {
        if let Err(e) = self.devices.source.close() {
            tracing::warn!("Failed to close capture source: {}", e);
        }
        if let Err(e) = self.devices.sink.close() {
            tracing::warn!("Failed to close playback sink: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{MemorySink, NullSink, ReaderSource};
    use crate::audio::tone::ToneSource;
    use crate::codec::encode;
    use proptest::prelude::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    fn config() -> PipelineConfig {
        PipelineConfig::new(8000, 16, 4)
    }

    fn paced_tone(config: &PipelineConfig) -> ToneSource {
        ToneSource::new(config.sample_format().unwrap(), config.sample_rate_hz, 440.0, 0.5).paced(true)
    }

    /// Delivers `good_frames` frames of a constant value, then fails
    struct FailingSource {
        good_frames: usize,
        closed: Arc<AtomicBool>,
    }

    impl CaptureSource for FailingSource {
        fn fill(&mut self, buf: &mut [u8]) -> std::result::Result<FillOutcome, AudioError> {
            if self.good_frames == 0 {
                return Err(AudioError::DeviceFailure("line unplugged".into()));
            }
            self.good_frames -= 1;
            buf.fill(0x10);
            Ok(FillOutcome::Filled(buf.len()))
        }

        fn close(&mut self) -> std::result::Result<(), AudioError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct DrainCounter(Arc<AtomicU64>);

    impl PlaybackSink for DrainCounter {
        fn write(&mut self, _buf: &[u8]) -> std::result::Result<(), AudioError> {
            Ok(())
        }

        fn drain(&mut self) -> std::result::Result<(), AudioError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_start_without_devices() {
        let mut processor = AudioProcessor::new(config()).unwrap();
        assert!(matches!(
            processor.start(),
            Err(Error::Pipeline(PipelineError::DeviceNotBound))
        ));
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_new_rejects_bad_format() {
        assert!(AudioProcessor::new(PipelineConfig::new(8000, 24, 4)).is_err());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor.stop();
        processor.stop();
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert!(!processor.is_running());
        assert!(processor.wait().unwrap().is_none());
    }

    #[test]
    fn test_start_twice_fails() {
        let cfg = PipelineConfig::new(8000, 16, 80);
        let mut processor = AudioProcessor::new(cfg).unwrap();
        processor.bind_devices(paced_tone(&cfg), NullSink::new()).unwrap();
        processor.start().unwrap();
        assert_eq!(processor.state(), ProcessorState::Running);

        let err = processor.start().unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::InvalidStateTransition { action: "start", .. })
        ));

        assert_eq!(processor.stop_and_wait().unwrap(), Some(StopReason::Stopped));
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn test_reconfigure_while_running_fails() {
        let cfg = PipelineConfig::new(8000, 16, 80);
        let mut processor = AudioProcessor::new(cfg).unwrap();
        processor.bind_devices(paced_tone(&cfg), NullSink::new()).unwrap();
        processor.start().unwrap();

        assert!(matches!(
            processor.set_frame_size(160),
            Err(Error::Pipeline(PipelineError::InvalidStateTransition { .. }))
        ));
        assert!(processor
            .bind_devices(paced_tone(&cfg), NullSink::new())
            .is_err());
        assert!(processor.set_transform(Passthrough).is_err());

        processor.stop();
        processor.wait().unwrap();

        processor.set_frame_size(160).unwrap();
        assert_eq!(processor.config().frame_size, 160);
    }

    #[test]
    fn test_end_of_stream_is_normal_termination() {
        // Below half scale, decode then encode reproduces the bytes exactly
        let samples = [0.5f32, -0.25, 0.125, 0.0, 0.375, -0.5, 0.25, -0.0625, 0.1, 0.2, 0.3, 0.4];
        let pcm = encode(&samples, 16).unwrap();

        let sink = MemorySink::new();
        let mut processor = AudioProcessor::new(config()).unwrap();
        let events = processor.events();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm.clone())), sink.clone())
            .unwrap();

        assert_eq!(processor.wait().unwrap(), Some(StopReason::EndOfStream));
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ProcessorEvent::Finished(StopReason::EndOfStream)
        );
        assert_eq!(sink.contents(), pcm);
        assert!(sink.is_closed());
        assert_eq!(processor.stats().frames_processed, 3);
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert!(!processor.has_devices());
    }

    #[test]
    fn test_passthrough_snapshots_match() {
        let pcm = encode(&[0.5, -0.5, 0.25, -0.25], 16).unwrap();
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm)), NullSink::new())
            .unwrap();
        processor.wait().unwrap();

        let input = processor.snapshot_input();
        let output = processor.snapshot_output();
        assert_eq!(input.samples, vec![0.5, -0.5, 0.25, -0.25]);
        assert_eq!(input.samples, output.samples);
        assert_eq!(input.loudness_dbfs, output.loudness_dbfs);
        assert!(input.loudness_dbfs.is_some());
    }

    #[test]
    fn test_device_failure_stops_cleanly_and_is_restartable() {
        let closed = Arc::new(AtomicBool::new(false));
        let sink = MemorySink::new();
        let mut processor = AudioProcessor::new(config()).unwrap();
        let events = processor.events();
        processor
            .bind_devices(
                FailingSource {
                    good_frames: 2,
                    closed: closed.clone(),
                },
                sink.clone(),
            )
            .unwrap();
        processor.start().unwrap();

        let err = processor.wait().unwrap_err();
        assert!(matches!(err, Error::Audio(AudioError::DeviceFailure(_))));
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ProcessorEvent::DeviceFailure(_)
        ));

        // Two whole frames, nothing partial
        assert_eq!(sink.contents().len(), 2 * config().frame_bytes());
        assert!(closed.load(Ordering::SeqCst));
        assert!(sink.is_closed());
        assert_eq!(processor.state(), ProcessorState::Idle);

        let pcm = encode(&[0.0; 4], 16).unwrap();
        processor
            .bind_devices(ReaderSource::new(Cursor::new(pcm)), NullSink::new())
            .unwrap();
        processor.start().unwrap();
        assert_eq!(processor.wait().unwrap(), Some(StopReason::EndOfStream));
        assert_eq!(processor.stats().runs, 2);
    }

    #[test]
    fn test_short_read_is_device_failure() {
        struct Short;
        impl CaptureSource for Short {
            fn fill(&mut self, buf: &mut [u8]) -> std::result::Result<FillOutcome, AudioError> {
                Ok(FillOutcome::Filled(buf.len() - 1))
            }
        }

        let mut processor = AudioProcessor::new(config()).unwrap();
        processor.bind_devices(Short, NullSink::new()).unwrap();
        processor.start().unwrap();
        assert!(matches!(
            processor.wait(),
            Err(Error::Audio(AudioError::ShortRead { expected: 8, got: 7 }))
        ));
    }

    #[test]
    fn test_out_of_range_output_is_clamped() {
        let pcm = encode(&[0.5, -0.5, 0.1, 0.0], 16).unwrap();
        let sink = MemorySink::new();
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor
            .set_transform(|input: &AudioFrame, output: &mut AudioFrame| {
                for (o, i) in output.samples_mut().iter_mut().zip(input.samples()) {
                    *o = i * 4.0;
                }
            })
            .unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm)), sink.clone())
            .unwrap();
        processor.wait().unwrap();

        assert_eq!(
            sink.contents(),
            vec![0x7F, 0xFF, 0x80, 0x01, 0x33, 0x34, 0x00, 0x00]
        );
        assert_eq!(processor.snapshot_output().samples[..2], [1.0, -1.0]);
        assert_eq!(processor.stats().samples_clamped, 2);
    }

    #[test]
    fn test_drain_policy() {
        let pcm = encode(&[0.0; 12], 16).unwrap();

        let per_frame = DrainCounter::default();
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor.set_drain_each_frame(true).unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm.clone())), per_frame.clone())
            .unwrap();
        processor.wait().unwrap();
        assert_eq!(per_frame.0.load(Ordering::SeqCst), 3);

        let at_shutdown = DrainCounter::default();
        processor.set_drain_each_frame(false).unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm)), at_shutdown.clone())
            .unwrap();
        processor.wait().unwrap();
        assert_eq!(at_shutdown.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_reaches_idle_within_one_frame() {
        // 80 samples at 8 kHz: 10 ms per frame
        let cfg = PipelineConfig::new(8000, 16, 80);
        let mut processor = AudioProcessor::new(cfg).unwrap();
        processor.bind_devices(paced_tone(&cfg), NullSink::new()).unwrap();
        processor.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(processor.is_running());

        let requested = Instant::now();
        processor.stop();
        assert!(!processor.is_running());
        assert_eq!(processor.wait().unwrap(), Some(StopReason::Stopped));

        // One 10 ms iteration plus scheduling slack
        assert!(requested.elapsed() < Duration::from_millis(100));
        assert!(processor.stats().frames_processed >= 1);
    }

    #[test]
    fn test_frame_size_change_applies_to_next_run() {
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor.set_frame_size(2).unwrap();
        let pcm = encode(&[0.1, 0.2, 0.3, 0.4], 16).unwrap();
        processor
            .bind_devices(ReaderSource::new(Cursor::new(pcm)), NullSink::new())
            .unwrap();
        processor.start().unwrap();
        processor.wait().unwrap();

        assert_eq!(processor.stats().frames_processed, 2);
        assert_eq!(processor.snapshot_input().samples.len(), 2);
    }

    #[test]
    fn test_stop_from_another_thread() {
        let cfg = PipelineConfig::new(8000, 16, 80);
        let mut processor = AudioProcessor::new(cfg).unwrap();
        processor.bind_devices(paced_tone(&cfg), NullSink::new()).unwrap();
        processor.start().unwrap();

        let stop = processor.stop_handle();
        let controller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            assert!(stop.is_running());
            stop.stop();
        });

        assert_eq!(processor.wait().unwrap(), Some(StopReason::Stopped));
        controller.join().unwrap();
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert!(!processor.stop_handle().is_running());
    }

    #[test]
    fn test_stop_handle_is_shareable() {
        fn assert_shareable<T: Send + Sync + Clone + 'static>() {}
        assert_shareable::<StopHandle>();
    }

    struct PanickingTransform;

    impl FrameTransform for PanickingTransform {
        fn process(&mut self, _input: &AudioFrame, _output: &mut AudioFrame) {
            panic!("boom");
        }
    }

    #[test]
    fn test_transform_panic_ends_run() {
        let pcm = encode(&[0.1; 8], 16).unwrap();
        let sink = MemorySink::new();
        let mut processor = AudioProcessor::new(config()).unwrap();
        let events = processor.events();
        processor.set_transform(PanickingTransform).unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm)), sink.clone())
            .unwrap();

        // Listeners hear about it without anyone calling wait()
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            ProcessorEvent::TransformPanicked("boom".into())
        );
        let deadline = Instant::now() + Duration::from_secs(1);
        while processor.state() != ProcessorState::Idle && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert!(!processor.is_running());
        assert!(sink.is_closed());
        assert!(sink.contents().is_empty());

        assert!(matches!(
            processor.wait(),
            Err(Error::Pipeline(PipelineError::TransformPanicked(msg))) if msg == "boom"
        ));

        // Still usable once the transform is replaced
        processor.set_transform(Passthrough).unwrap();
        let pcm = encode(&[0.0; 4], 16).unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm)), NullSink::new())
            .unwrap();
        assert_eq!(processor.wait().unwrap(), Some(StopReason::EndOfStream));
    }

    #[test]
    fn test_failed_spawn_keeps_devices_and_transform() {
        let pcm = encode(&[0.5, 0.5, -0.5, 0.0], 16).unwrap();
        let sink = MemorySink::new();
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor
            .set_transform(|input: &AudioFrame, output: &mut AudioFrame| {
                for (o, i) in output.samples_mut().iter_mut().zip(input.samples()) {
                    *o = i * 0.5;
                }
            })
            .unwrap();
        processor
            .bind_devices(ReaderSource::new(Cursor::new(pcm)), sink.clone())
            .unwrap();

        let err = processor
            .start_on(|_| Err(io::Error::new(io::ErrorKind::Other, "thread limit reached")))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(processor.has_devices());
        assert!(!sink.is_closed());
        assert!(!processor.is_running());
        assert_eq!(processor.state(), ProcessorState::Idle);
        assert_eq!(processor.stats().runs, 0);

        processor.start().unwrap();
        assert_eq!(processor.wait().unwrap(), Some(StopReason::EndOfStream));
        assert_eq!(
            sink.contents(),
            vec![0x20, 0x00, 0x20, 0x00, 0xE0, 0x00, 0x00, 0x00]
        );
        assert_eq!(processor.stats().runs, 1);
    }

    #[test]
    fn test_clamping_counted_on_every_frame() {
        let pcm = encode(&[0.5, 0.0, 0.0, 0.0, -0.5, 0.0, 0.0, 0.0], 16).unwrap();
        let mut processor = AudioProcessor::new(config()).unwrap();
        processor
            .set_transform(|input: &AudioFrame, output: &mut AudioFrame| {
                for (o, i) in output.samples_mut().iter_mut().zip(input.samples()) {
                    *o = i * 3.0;
                }
            })
            .unwrap();
        processor
            .start_with(config(), ReaderSource::new(Cursor::new(pcm)), NullSink::new())
            .unwrap();
        processor.wait().unwrap();

        assert_eq!(processor.stats().frames_processed, 2);
        assert_eq!(processor.stats().samples_clamped, 2);
        assert_eq!(processor.snapshot_output().samples[0], -1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_passthrough_output_matches_input(words in prop::collection::vec(any::<i16>(), 1..64)) {
            let pcm: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
            let cfg = PipelineConfig::new(8000, 16, words.len());
            let sink = MemorySink::new();
            let mut processor = AudioProcessor::new(cfg).unwrap();
            processor
                .start_with(cfg, ReaderSource::new(Cursor::new(pcm.clone())), sink.clone())
                .unwrap();
            prop_assert_eq!(processor.wait().unwrap(), Some(StopReason::EndOfStream));

            let (input, output) = processor.monitor().snapshot_pair();
            prop_assert_eq!(input.samples.len(), words.len());
            prop_assert_eq!(&output.samples, &input.samples);
            prop_assert_eq!(output.loudness_dbfs, input.loudness_dbfs);
            prop_assert_eq!(processor.stats().samples_clamped, 0);

            let played = sink.contents();
            prop_assert_eq!(played.len(), pcm.len());
            for (a, b) in pcm.chunks(2).zip(played.chunks(2)) {
                let a = i16::from_be_bytes([a[0], a[1]]) as i32;
                let b = i16::from_be_bytes([b[0], b[1]]) as i32;
                prop_assert!((a - b).abs() <= 1);
            }
        }
    }
}
