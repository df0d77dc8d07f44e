//! Turn coordinator
//!
//! Wires the input queue, the turn engine, the speech session and the
//! playback sink into one pipeline for the life of the process:
//!
//! ```text
//! submit ──► input queue ──► turn worker ──► speech worker ──► playback sink
//!  (sync)     (bounded)      (TurnEngine)    (one session      (device thread)
//!                                             per turn)
//! ```
//!
//! A new submission bumps the playback generation before it is queued, so
//! audio from any earlier turn is discarded while the earlier turn's model
//! call is left to finish.

mod observer;
mod stages;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use observer::{EventChannel, TurnEvent, TurnId, TurnObserver};

use crate::agent::TurnEngine;
use crate::config::PipelineConfig;
use crate::voice::{PlaybackSink, SpeechSynthesizer};
use crate::{Error, Result};

use stages::{Counters, SpeechStage, TurnRequest, TurnStage};

/// What the pipeline is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing queued, running or playing
    Idle,
    /// A turn is queued or waiting on the model/tools
    TurnInFlight,
    /// The last answer is being synthesized or played
    Speaking,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::TurnInFlight => "turn_in_flight",
            Self::Speaking => "speaking",
        };
        write!(f, "{s}")
    }
}

/// Owns the pipeline workers; the interface talks to it through
/// [`submit`](Self::submit) and [`shutdown`](Self::shutdown)
pub struct TurnCoordinator {
    input: mpsc::Sender<TurnRequest>,
    sink: Arc<PlaybackSink>,
    generation: watch::Sender<u64>,
    counters: Arc<Counters>,
    next_turn: AtomicU64,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl TurnCoordinator {
    /// Start the pipeline workers on the current tokio runtime
    ///
    /// Without a synthesizer answers are delivered as text only.
    #[must_use]
    pub fn start(
        engine: TurnEngine,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        sink: Arc<PlaybackSink>,
        observer: Arc<dyn TurnObserver>,
        config: PipelineConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let (input_tx, input_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (generation_tx, generation_rx) = watch::channel(sink.generation());

        let mut tasks = Vec::with_capacity(2);

        let speech_tx = speech.map(|synthesizer| {
            let (tx, rx) = mpsc::unbounded_channel();
            let stage = SpeechStage {
                synthesizer,
                sink: Arc::clone(&sink),
                generation: generation_rx,
                observer: Arc::clone(&observer),
                counters: Arc::clone(&counters),
                cancel: cancel.clone(),
            };
            tasks.push(tokio::spawn(stage.run(rx)));
            tx
        });

        let stage = TurnStage {
            engine,
            speech: speech_tx,
            sink: Arc::clone(&sink),
            observer,
            counters: Arc::clone(&counters),
            cancel: cancel.clone(),
        };
        tasks.push(tokio::spawn(stage.run(input_rx)));

        tracing::info!(
            queue_capacity = config.queue_capacity,
            speech = tasks.len() > 1,
            "turn coordinator started"
        );

        Self {
            input: input_tx,
            sink,
            generation: generation_tx,
            counters,
            next_turn: AtomicU64::new(0),
            cancel,
            tasks: Mutex::new(tasks),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Queue a user turn without blocking
    ///
    /// Any audio still buffered or playing from earlier turns is discarded
    /// before the request is queued.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if the input queue is full and
    /// `Error::ShutDown` after [`shutdown`](Self::shutdown)
    pub fn submit(&self, text: impl Into<String>) -> Result<TurnId> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShutDown);
        }

        let permit = self.input.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => Error::Busy,
            mpsc::error::TrySendError::Closed(()) => Error::ShutDown,
        })?;

        let phase = self.state();
        if phase != Phase::Idle {
            tracing::info!(%phase, "barge-in, discarding previous audio");
        }

        // Reset before the new turn can append anything to history
        let generation = self.sink.reset();
        self.generation.send_replace(generation);

        let turn = self.next_turn.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.turns.fetch_add(1, Ordering::AcqRel);
        permit.send(TurnRequest {
            turn,
            text: text.into(),
            generation,
        });

        tracing::debug!(turn, generation, "turn submitted");
        Ok(turn)
    }

    /// Current pipeline phase
    #[must_use]
    pub fn state(&self) -> Phase {
        if self.counters.turns.load(Ordering::Acquire) > 0 {
            Phase::TurnInFlight
        } else if self.counters.speaking.load(Ordering::Acquire) > 0 {
            Phase::Speaking
        } else {
            Phase::Idle
        }
    }

    /// Playback sink shared with the speech worker
    #[must_use]
    pub fn sink(&self) -> &Arc<PlaybackSink> {
        &self.sink
    }

    /// Stop all workers and release the output device
    ///
    /// Waits up to the configured timeout for in-flight work, then aborts
    /// whatever is left. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        if tasks.is_empty() {
            return;
        }

        tracing::info!(timeout = ?self.shutdown_timeout, "shutting down turn coordinator");

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let started = tokio::time::Instant::now();

        if tokio::time::timeout(self.shutdown_timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("workers did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        let remaining = self
            .shutdown_timeout
            .saturating_sub(started.elapsed())
            .max(Duration::from_millis(100));
        self.sink.stop(remaining).await;

        tracing::info!("turn coordinator stopped");
    }
}

impl Drop for TurnCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
