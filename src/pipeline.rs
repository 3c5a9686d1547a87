use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::audio::analysis::{SpectrumAnalyzer, Window};
use crate::audio::bands::BandTable;
use crate::audio::features::SpectrumFrame;
use crate::audio::scaler::BandScaler;
use crate::audio::source::{DeviceHandle, FrameReader, PcmSource, ReadError};
use crate::error::{CaptureError, Result};
use crate::sink::{DeliverySink, PipelineEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub bands: BandTable,
    pub window: Window,
    /// Consecutive read failures tolerated before the activation ends with
    /// [`CaptureError::DeviceLost`]. Zero retries forever.
    pub read_failure_limit: u32,
    pub read_retry: Duration,
}

impl PipelineConfig {
    pub fn new(sample_rate: u32, bands: BandTable) -> Self {
        Self {
            sample_rate,
            bands,
            window: Window::Rectangular,
            read_failure_limit: 64,
            read_retry: Duration::from_millis(5),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.bands.frame_size()
    }
}

thread_local! {
    /// Set on capture threads: the owning pipeline and the activation's
    /// running flag.
    static CAPTURE_THREAD: RefCell<Option<(usize, Arc<AtomicBool>)>> = const { RefCell::new(None) };
}

struct Worker {
    generation: u64,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    fn join(self) {
        if self.thread.join().is_err() {
            log::error!("Capture thread of generation {} panicked", self.generation);
        }
    }
}

struct Activation {
    worker: Worker,
    handle: Box<dyn DeviceHandle>,
}

struct Inner {
    state: PipelineState,
    active: Option<Activation>,
    /// Capture threads that stopped themselves and still need joining.
    retired: Vec<Worker>,
}

struct Shared {
    config: PipelineConfig,
    source: Box<dyn PcmSource>,
    sink: Box<dyn DeliverySink>,
    inner: Mutex<Inner>,
    generation: AtomicU64,
}

/// Owns the capture thread of each activation and feeds analyzed frames to
/// the delivery sink.
///
/// Control calls are serialized, and `stop` from a control thread joins the
/// capture thread before returning. Capture threads never take the control
/// lock: `stop` from a delivery callback clears the activation's running
/// flag and releases the device, and the next `start` joins the thread.
pub struct CapturePipeline {
    shared: Arc<Shared>,
    control: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CapturePipeline {
    pub fn new(
        config: PipelineConfig,
        source: impl PcmSource + 'static,
        sink: impl DeliverySink + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                source: Box::new(source),
                sink: Box::new(sink),
                inner: Mutex::new(Inner {
                    state: PipelineState::Idle,
                    active: None,
                    retired: Vec::new(),
                }),
                generation: AtomicU64::new(0),
            }),
            control: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn state(&self) -> PipelineState {
        lock(&self.shared.inner).state
    }

    /// Number of activations that reached `Running`.
    pub fn activations(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Begin capturing. A no-op while already starting or running.
    ///
    /// A device init failure is delivered to the sink once and returned;
    /// the pipeline stays `Idle` and no capture thread is spawned.
    pub fn start(&self) -> Result<()> {
        if self.shared.capture_flag().is_some() {
            return Err(CaptureError::Configuration(
                "start called from a delivery callback".into(),
            ));
        }

        // The sink may call back into the pipeline, so errors are delivered
        // after the control lock is released.
        let started = {
            let _control = lock(&self.control);
            self.activate()
        };
        if let Err(ref err) = started {
            log::error!("Capture failed to start: {}", err);
            self.shared.sink.deliver(PipelineEvent::Error(err.clone()));
        }
        started
    }

    fn activate(&self) -> Result<()> {
        let retired = {
            let mut inner = lock(&self.shared.inner);
            match inner.state {
                PipelineState::Starting | PipelineState::Running => return Ok(()),
                PipelineState::Idle | PipelineState::Stopping => {}
            }
            inner.state = PipelineState::Starting;
            std::mem::take(&mut inner.retired)
        };
        for worker in retired {
            worker.join();
        }

        let config = &self.shared.config;
        let stream = match self.shared.source.open(config.sample_rate, config.frame_size()) {
            Ok(stream) => stream,
            Err(err) => return Err(self.fail_start(err)),
        };
        let mut handle = stream.handle;
        let reader = stream.reader;

        let generation = self.shared.generation.load(Ordering::SeqCst) + 1;
        let running = Arc::new(AtomicBool::new(true));

        // The capture thread only touches `inner` after this guard drops, by
        // which time its activation is registered.
        let mut inner = lock(&self.shared.inner);
        let spawned = {
            let shared = Arc::clone(&self.shared);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("capture-{}", generation))
                .spawn(move || run_capture(shared, reader, generation, running))
        };
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                drop(inner);
                handle.close();
                let err = CaptureError::DeviceInit(format!("failed to spawn capture thread: {}", e));
                return Err(self.fail_start(err));
            }
        };

        self.shared.generation.store(generation, Ordering::SeqCst);
        inner.active = Some(Activation {
            worker: Worker {
                generation,
                running,
                thread,
            },
            handle,
        });
        inner.state = PipelineState::Running;
        log::info!(
            "Capture started (generation {}, {}Hz, {} samples/frame, {} bands)",
            generation,
            config.sample_rate,
            config.frame_size(),
            config.bands.len()
        );
        Ok(())
    }

    /// Stop capturing. Idempotent, and safe to call from a delivery
    /// callback. No frame is delivered after it returns.
    pub fn stop(&self) {
        if let Some(running) = self.shared.capture_flag() {
            running.store(false, Ordering::Release);
            self.shared.retire_current();
            return;
        }
        let _control = lock(&self.control);

        let (active, retired) = {
            let mut inner = lock(&self.shared.inner);
            if inner.active.is_some() {
                inner.state = PipelineState::Stopping;
            }
            (inner.active.take(), std::mem::take(&mut inner.retired))
        };

        if let Some(Activation { worker, mut handle }) = active {
            let generation = worker.generation;
            worker.running.store(false, Ordering::Release);
            handle.close();
            worker.join();
            log::info!("Capture stopped (generation {})", generation);
        }
        for worker in retired {
            worker.join();
        }

        lock(&self.shared.inner).state = PipelineState::Idle;
    }

    /// Report that the platform refused microphone access. Ends any running
    /// activation and delivers a single `PermissionDenied` error.
    pub fn permission_denied(&self) {
        self.stop();
        let err = CaptureError::PermissionDenied("user denied microphone access".into());
        log::error!("{}", err);
        self.shared.sink.deliver(PipelineEvent::Error(err));
    }

    fn fail_start(&self, err: CaptureError) -> CaptureError {
        lock(&self.shared.inner).state = PipelineState::Idle;
        err
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn key(&self) -> usize {
        self as *const Shared as usize
    }

    /// Running flag of the current thread's activation, if this is one of
    /// our capture threads.
    fn capture_flag(&self) -> Option<Arc<AtomicBool>> {
        let key = self.key();
        CAPTURE_THREAD.with(|slot| match &*slot.borrow() {
            Some((owner, running)) if *owner == key => Some(Arc::clone(running)),
            _ => None,
        })
    }

    /// Called on a capture thread: if its activation is still the active
    /// one, release the device and park the thread for the next `start` to
    /// join. A control thread already stopping it has taken it out of
    /// `active` and is joining it, so there is nothing to do.
    fn retire_current(&self) {
        let me = thread::current().id();
        let mut handle = {
            let mut inner = lock(&self.inner);
            let is_active = inner.active.as_ref().map_or(false, |a| a.worker.id() == me);
            if !is_active {
                return;
            }
            let Some(Activation { worker, handle }) = inner.active.take() else {
                return;
            };
            worker.running.store(false, Ordering::Release);
            log::info!("Capture ended from its own thread (generation {})", worker.generation);
            inner.retired.push(worker);
            inner.state = PipelineState::Idle;
            handle
        };
        handle.close();
    }
}

fn run_capture(
    shared: Arc<Shared>,
    mut reader: Box<dyn FrameReader>,
    generation: u64,
    running: Arc<AtomicBool>,
) {
    CAPTURE_THREAD.with(|slot| *slot.borrow_mut() = Some((shared.key(), Arc::clone(&running))));

    let config = &shared.config;
    let mut analyzer = SpectrumAnalyzer::new(config.bands.clone(), config.window);
    let scaler = BandScaler::new(&config.bands);
    let mut frame = vec![0i16; config.frame_size()];
    let mut sequence = 0u64;
    let mut failures = 0u32;

    let fatal = loop {
        if !running.load(Ordering::Acquire) {
            break None;
        }

        match reader.read_frame(&mut frame) {
            Ok(()) => failures = 0,
            Err(ReadError::EndOfStream) => {
                if running.load(Ordering::Acquire) {
                    log::info!("Capture source ended (generation {})", generation);
                }
                break None;
            }
            Err(ReadError::Device(message)) => {
                failures += 1;
                let err = CaptureError::Read(message);
                log::warn!("Skipping frame ({} in a row): {}", failures, err);
                if config.read_failure_limit > 0 && failures >= config.read_failure_limit {
                    break Some(CaptureError::DeviceLost { failures });
                }
                thread::sleep(config.read_retry);
                continue;
            }
        }

        let raw = match analyzer.calculate(&frame) {
            Ok(raw) => raw,
            Err(err) => break Some(err),
        };
        let bands = scaler.scale(&raw);

        if !running.load(Ordering::Acquire) {
            break None;
        }
        shared.sink.deliver(PipelineEvent::Frame(SpectrumFrame {
            generation,
            sequence,
            bands,
        }));
        sequence += 1;
    };

    if let Some(err) = fatal {
        if running.load(Ordering::Acquire) {
            log::error!("Capture generation {} failed: {}", generation, err);
            shared.sink.deliver(PipelineEvent::Error(err));
        }
    }

    shared.retire_current();
    CAPTURE_THREAD.with(|slot| *slot.borrow_mut() = None);
    log::debug!("Capture generation {} delivered {} frames", generation, sequence);
}
