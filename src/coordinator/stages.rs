//! Long-lived pipeline workers

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{TurnId, TurnObserver};
use crate::agent::TurnEngine;
use crate::voice::{PlaybackSink, SpeechSynthesizer};

/// Work counted by [`super::TurnCoordinator::state`]
#[derive(Debug, Default)]
pub(super) struct Counters {
    /// Turns queued or running
    pub turns: AtomicUsize,
    /// Answers being synthesized or played
    pub speaking: AtomicUsize,
}

/// A submitted user turn
#[derive(Debug)]
pub(super) struct TurnRequest {
    pub turn: TurnId,
    pub text: String,
    pub generation: u64,
}

/// A final answer waiting to be spoken
#[derive(Debug)]
pub(super) struct SpeechJob {
    turn: TurnId,
    text: String,
    generation: u64,
}

/// Runs turns one at a time; owns the engine and therefore the history
pub(super) struct TurnStage {
    pub engine: TurnEngine,
    pub speech: Option<mpsc::UnboundedSender<SpeechJob>>,
    pub sink: Arc<PlaybackSink>,
    pub observer: Arc<dyn TurnObserver>,
    pub counters: Arc<Counters>,
    pub cancel: CancellationToken,
}

impl TurnStage {
    pub async fn run(mut self, mut rx: mpsc::Receiver<TurnRequest>) {
        loop {
            let request = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            // The model/tool loop is not preempted; only its audio is
            let reply = self.engine.run_turn(&request.text).await;
            self.observer.on_final_text(request.turn, &reply.text);

            let superseded = self.sink.generation() != request.generation;
            if superseded {
                tracing::debug!(turn = request.turn, "turn superseded, answer not spoken");
            }

            let job = SpeechJob {
                turn: request.turn,
                text: reply.text,
                generation: request.generation,
            };
            let queued = match &self.speech {
                Some(speech) if !superseded => {
                    self.counters.speaking.fetch_add(1, Ordering::AcqRel);
                    speech.send(job).map_err(|mpsc::error::SendError(job)| {
                        self.counters.speaking.fetch_sub(1, Ordering::AcqRel);
                        job
                    })
                }
                _ => Err(job),
            };

            self.counters.turns.fetch_sub(1, Ordering::AcqRel);
            match queued {
                Ok(()) => self.engine.mark_speaking(),
                Err(job) => self.observer.on_turn_end(job.turn),
            }
            tracing::debug!(turn = request.turn, state = %self.engine.state(), "turn handed off");
        }

        tracing::debug!("turn worker stopped");
    }
}

/// Streams each answer through a fresh speech session into the sink
pub(super) struct SpeechStage {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<PlaybackSink>,
    pub generation: watch::Receiver<u64>,
    pub observer: Arc<dyn TurnObserver>,
    pub counters: Arc<Counters>,
    pub cancel: CancellationToken,
}

impl SpeechStage {
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SpeechJob>) {
        loop {
            let job = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            if self.sink.generation() == job.generation {
                self.speak(&job).await;
            } else {
                tracing::debug!(turn = job.turn, "skipping speech for superseded turn");
            }

            self.counters.speaking.fetch_sub(1, Ordering::AcqRel);
            self.observer.on_turn_end(job.turn);
        }

        tracing::debug!("speech worker stopped");
    }

    async fn speak(&mut self, job: &SpeechJob) {
        let mut audio = self.synthesizer.synthesize(&job.text).await;
        let mut frames = 0u64;

        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = superseded(&mut self.generation, job.generation) => {
                    tracing::debug!(turn = job.turn, frames, "speech interrupted");
                    return;
                }
                frame = audio.next() => frame,
            };

            let Some(frame) = frame else { break };
            if self.sink.enqueue_for(job.generation, frame).is_err() {
                return;
            }
            frames += 1;
        }

        // Dropping the stream closes the session
        drop(audio);
        tracing::debug!(turn = job.turn, frames, "speech streamed");

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            () = superseded(&mut self.generation, job.generation) => {
                tracing::debug!(turn = job.turn, "playback interrupted");
            }
            result = self.sink.drain() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "playback unavailable");
                }
            }
        }
    }
}

/// Resolves once a newer generation has been published
async fn superseded(rx: &mut watch::Receiver<u64>, generation: u64) {
    // A closed channel means the coordinator is gone; stop either way
    let _ = rx.wait_for(|&current| current != generation).await;
}
