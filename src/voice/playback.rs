//! Ordered audio playback on a dedicated thread
//!
//! The sink hands frames to a worker thread that owns the output device.
//! Every frame is tagged with the sink's generation at enqueue time; a
//! [`PlaybackSink::reset`] bumps the generation so anything older is
//! discarded without being rendered.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use super::{AudioFrame, OutputDevice};
use crate::{Error, Result};

/// First delay before reopening a failed device
const REOPEN_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Longest delay between reopen attempts
const REOPEN_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Opens the output device on the playback thread
pub type DeviceFactory = Box<dyn FnMut() -> Result<Box<dyn OutputDevice>> + Send>;

enum Command {
    Play { generation: u64, frame: AudioFrame },
    Reset(u64),
    Drain(oneshot::Sender<()>),
    Stop,
}

/// Non-blocking handle to the playback worker
pub struct PlaybackSink {
    tx: mpsc::UnboundedSender<Command>,
    generation: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSink {
    /// Start the playback thread
    ///
    /// The device is opened lazily on the first frame, and reopened after
    /// a device error.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn<F>(factory: F) -> Result<Self>
    where
        F: FnMut() -> Result<Box<dyn OutputDevice>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            factory: Box::new(factory),
            rx,
            generation: Arc::clone(&generation),
            pending: Arc::clone(&pending),
        };

        let handle = std::thread::Builder::new()
            .name("jarvis-playback".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            generation,
            pending,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a frame for the current generation
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShutDown` once the sink has been stopped
    pub fn enqueue(&self, frame: AudioFrame) -> Result<()> {
        self.enqueue_for(self.generation(), frame)
    }

    /// Queue a frame produced for `generation`
    ///
    /// Frames from a generation older than the current one are dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShutDown` once the sink has been stopped
    pub fn enqueue_for(&self, generation: u64, frame: AudioFrame) -> Result<()> {
        if generation < self.generation() {
            tracing::trace!(generation, seq = frame.seq, "dropping stale frame");
            return Ok(());
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx
            .send(Command::Play { generation, frame })
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Error::ShutDown
            })
    }

    /// Discard everything buffered but not yet played
    ///
    /// Returns the new generation; frames tagged with it are the only ones
    /// that will play from now on. The device stays open.
    pub fn reset(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self.tx.send(Command::Reset(generation));
        tracing::debug!(generation, "playback reset");
        generation
    }

    /// Current generation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Frames queued but not yet handed to the device
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every frame queued so far has been rendered
    ///
    /// # Errors
    ///
    /// Returns `Error::ShutDown` if the worker has stopped
    pub async fn drain(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Drain(done_tx))
            .map_err(|_| Error::ShutDown)?;
        done_rx.await.map_err(|_| Error::ShutDown)
    }

    /// Stop the worker and release the device
    ///
    /// Buffered frames are discarded. Waits up to `timeout` for the thread to
    /// exit; a worker stuck in a device write is left to finish on its own.
    /// Calling this more than once is harmless.
    pub async fn stop(&self, timeout: Duration) {
        let Some(handle) = self.worker.lock().ok().and_then(|mut w| w.take()) else {
            return;
        };

        self.reset();
        let _ = self.tx.send(Command::Stop);

        let joined = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || handle.join()),
        )
        .await;

        match joined {
            Ok(Ok(Ok(()))) => tracing::debug!("playback worker stopped"),
            Ok(_) => tracing::warn!("playback worker panicked"),
            Err(_) => tracing::warn!(?timeout, "playback worker did not stop in time"),
        }
    }
}

struct Worker {
    factory: DeviceFactory,
    rx: mpsc::UnboundedReceiver<Command>,
    generation: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    fn run(self) {
        let Self {
            factory,
            mut rx,
            generation,
            pending,
        } = self;

        // Device handles are created and dropped on this thread only
        let mut output = Output {
            factory,
            generation,
            device: None,
            rendered_generation: 0,
            failures: 0,
            reopen_at: None,
        };

        tracing::debug!("playback worker started");

        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Play { generation, frame } => {
                    output.play(generation, &frame);
                    pending.fetch_sub(1, Ordering::AcqRel);
                }
                Command::Reset(generation) => output.reset(generation),
                Command::Drain(done) => {
                    output.drain();
                    let _ = done.send(());
                }
                Command::Stop => break,
            }
        }

        drop(output);
        tracing::debug!("playback worker exiting");
    }
}

struct Output {
    factory: DeviceFactory,
    generation: Arc<AtomicU64>,
    device: Option<Box<dyn OutputDevice>>,
    rendered_generation: u64,
    failures: u32,
    reopen_at: Option<Instant>,
}

impl Output {
    fn play(&mut self, generation: u64, frame: &AudioFrame) {
        if generation < self.generation.load(Ordering::Acquire) {
            tracing::trace!(generation, seq = frame.seq, "skipping stale frame");
            return;
        }

        let fresh = generation != self.rendered_generation;
        let Some(device) = self.device() else {
            tracing::trace!(seq = frame.seq, "no output device, frame dropped");
            return;
        };

        let result = if fresh {
            // Silence whatever the previous generation left in the device
            device.flush().and_then(|()| device.write(frame))
        } else {
            device.write(frame)
        };
        self.rendered_generation = generation;

        if let Err(e) = result {
            self.fail(&e);
        }
    }

    fn reset(&mut self, generation: u64) {
        if generation <= self.rendered_generation {
            return;
        }
        self.rendered_generation = generation;
        if let Some(device) = self.device.as_mut()
            && let Err(e) = device.flush()
        {
            self.fail(&e);
        }
    }

    fn drain(&mut self) {
        if let Some(device) = self.device.as_mut()
            && let Err(e) = device.drain()
        {
            self.fail(&e);
        }
    }

    fn device(&mut self) -> Option<&mut Box<dyn OutputDevice>> {
        if self.device.is_none() {
            if self.reopen_at.is_some_and(|at| Instant::now() < at) {
                return None;
            }

            match (self.factory)() {
                Ok(device) => {
                    if self.failures > 0 {
                        tracing::info!(attempts = self.failures, "output device reopened");
                    }
                    self.failures = 0;
                    self.reopen_at = None;
                    self.device = Some(device);
                }
                Err(e) => {
                    self.fail(&e);
                    return None;
                }
            }
        }

        self.device.as_mut()
    }

    fn fail(&mut self, error: &Error) {
        self.device = None;
        self.failures = self.failures.saturating_add(1);

        let backoff = REOPEN_BACKOFF_BASE
            .saturating_mul(1 << self.failures.min(6))
            .min(REOPEN_BACKOFF_MAX);
        self.reopen_at = Some(Instant::now() + backoff);

        tracing::warn!(
            error = %error,
            failures = self.failures,
            retry_in = ?backoff,
            "output device failed"
        );
    }
}
