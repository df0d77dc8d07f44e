//! Turn notifications for the user-facing surface

use tokio::sync::mpsc;

/// Identifier handed out by [`super::TurnCoordinator::submit`]
pub type TurnId = u64;

/// Receives turn results from the coordinator's workers
///
/// Callbacks run on a worker task and should return quickly.
pub trait TurnObserver: Send + Sync {
    /// The answer for `turn` is ready; never empty
    fn on_final_text(&self, turn: TurnId, text: &str);

    /// `turn` is over: its speech finished, was discarded, or was never
    /// produced
    fn on_turn_end(&self, turn: TurnId);
}

/// Notification emitted by [`EventChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Final answer text
    FinalText {
        /// Turn the answer belongs to
        turn: TurnId,
        /// Answer text
        text: String,
    },
    /// End of a turn
    TurnEnd {
        /// Turn that ended
        turn: TurnId,
    },
}

impl TurnEvent {
    /// Turn this event belongs to
    #[must_use]
    pub const fn turn(&self) -> TurnId {
        match self {
            Self::FinalText { turn, .. } | Self::TurnEnd { turn } => *turn,
        }
    }
}

/// Observer that forwards notifications into a channel
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl EventChannel {
    /// Create an observer and the receiving end of its events
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("turn event dropped, no listener");
        }
    }
}

impl TurnObserver for EventChannel {
    fn on_final_text(&self, turn: TurnId, text: &str) {
        self.emit(TurnEvent::FinalText {
            turn,
            text: text.to_string(),
        });
    }

    fn on_turn_end(&self, turn: TurnId) {
        self.emit(TurnEvent::TurnEnd { turn });
    }
}
