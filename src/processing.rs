//! Background processing worker for captured depth frames.
//!
//! Frames are submitted from the capture side and converted one at a time,
//! in submission order, on a dedicated thread. The worker prepares the
//! converter lazily from the first frame it sees (and again after every
//! reset). A [`LifecycleHandle`] lets another thread reset the converter,
//! for example when the application is backgrounded.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::depth::{Converter, ConverterError, DepthFrame, DepthMap, GrayImage, resolve};

/// Receives every converted image. Dropping the image recycles its buffer.
pub type ImageSink = Box<dyn FnMut(GrayImage) + Send>;

/// Errors from the processing worker itself.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to spawn processing thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Processing worker has stopped")]
    Stopped,
}

/// Commands sent to the processing thread.
enum ProcessingCommand {
    Frame(DepthMap),
    Stop,
}

#[derive(Debug, Default)]
struct Counters {
    converted: AtomicU64,
    dropped: AtomicU64,
}

/// Prepare `converter` from `frame` if needed, then render it.
///
/// This is the convenience path for callers that do not inspect the first
/// frame themselves.
pub fn render_prepared(
    converter: &Converter,
    retained_buffers: NonZeroUsize,
    frame: &DepthFrame<'_>,
) -> Result<GrayImage, ConverterError> {
    if !converter.is_prepared() {
        let descriptor = resolve(frame)?;
        converter.prepare(&descriptor, retained_buffers)?;
    }
    converter.render(frame)
}

/// Handle for resetting a shared converter from a lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    converter: Arc<Converter>,
}

impl LifecycleHandle {
    pub fn new(converter: Arc<Converter>) -> Self {
        Self { converter }
    }

    /// Free the converter's pool. The next frame re-prepares it.
    pub fn reset(&self) {
        log::info!("Releasing depth converter resources");
        self.converter.reset();
    }
}

/// Converts submitted depth frames on a background thread.
pub struct DepthProcessor {
    converter: Arc<Converter>,
    command_tx: Option<Sender<ProcessingCommand>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for DepthProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthProcessor")
            .field("converted", &self.converted())
            .field("dropped", &self.dropped())
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DepthProcessor {
    /// Start the processing thread.
    ///
    /// # Arguments
    /// * `converter` - Converter shared with any lifecycle handles
    /// * `retained_buffers` - Pool size used when the worker prepares
    /// * `sink` - Called with each converted image, on the worker thread
    ///
    /// # Errors
    /// * `ProcessingError::SpawnFailed` - If the thread cannot be created
    pub fn start(
        converter: Arc<Converter>,
        retained_buffers: NonZeroUsize,
        sink: ImageSink,
    ) -> Result<Self, ProcessingError> {
        let (tx, rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());

        let worker_converter = Arc::clone(&converter);
        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name("depth-processing".to_string())
            .spawn(move || {
                run_processing_loop(worker_converter, retained_buffers, rx, sink, worker_counters)
            })?;

        Ok(Self {
            converter,
            command_tx: Some(tx),
            worker: Some(worker),
            counters,
        })
    }

    /// Queue a frame for conversion.
    ///
    /// # Errors
    /// * `ProcessingError::Stopped` - If the worker is no longer running
    pub fn submit(&self, frame: DepthMap) -> Result<(), ProcessingError> {
        let tx = self.command_tx.as_ref().ok_or(ProcessingError::Stopped)?;
        tx.send(ProcessingCommand::Frame(frame))
            .map_err(|_| ProcessingError::Stopped)
    }

    /// A handle that resets this processor's converter.
    pub fn lifecycle(&self) -> LifecycleHandle {
        LifecycleHandle::new(Arc::clone(&self.converter))
    }

    pub fn converter(&self) -> &Arc<Converter> {
        &self.converter
    }

    /// Frames converted and passed to the sink so far.
    pub fn converted(&self) -> u64 {
        self.counters.converted.load(Ordering::SeqCst)
    }

    /// Frames that failed to convert so far.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Finish every queued frame, then stop the thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(ProcessingCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Processing thread panicked");
            }
        }
    }
}

impl Drop for DepthProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_processing_loop(
    converter: Arc<Converter>,
    retained_buffers: NonZeroUsize,
    rx: Receiver<ProcessingCommand>,
    mut sink: ImageSink,
    counters: Arc<Counters>,
) {
    // Ends on Stop or when every sender is gone
    while let Ok(ProcessingCommand::Frame(map)) = rx.recv() {
        match render_prepared(&converter, retained_buffers, &map.as_frame()) {
            Ok(image) => {
                counters.converted.fetch_add(1, Ordering::SeqCst);
                sink(image);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::SeqCst);
                log::warn!("Unable to convert depth frame: {}", e);
            }
        }
    }
    log::debug!("Processing thread exiting");
}
