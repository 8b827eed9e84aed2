//! Conversational turn tracking.
//!
//! ```text
//! Idle --capture started--> Recording
//! Recording --speech_stopped--> AwaitingResponse
//! AwaitingResponse --response.created--> Receiving
//! Receiving --response.done--> Recording
//! any --rate_limits.updated--> Recording
//! ```

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Recording,
    AwaitingResponse,
    Receiving,
}

/// Derives microphone and playback state from inbound events.
///
/// Owned by the session loop and rebuilt for every connection.
#[derive(Debug)]
pub struct TurnStateMachine {
    state: TurnState,
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether captured audio should be sent upstream.
    pub fn is_recording(&self) -> bool {
        self.state == TurnState::Recording
    }

    fn transition(&mut self, next: TurnState, cause: &'static str) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, cause, "Turn state changed.");
        }
        self.state = next;
    }

    /// Capture is running; start streaming the microphone.
    pub fn capture_started(&mut self) {
        if self.state == TurnState::Idle {
            self.transition(TurnState::Recording, "capture started");
        }
    }

    /// Returns true when the utterance should be committed. Outside
    /// `Recording` the event is ignored.
    pub fn speech_stopped(&mut self) -> bool {
        if self.state != TurnState::Recording {
            debug!(state = ?self.state, "speech_stopped outside Recording ignored.");
            return false;
        }
        self.transition(TurnState::AwaitingResponse, "speech stopped");
        true
    }

    /// A response started. Accepted from any state, since the follow-up
    /// response to a tool result arrives without a new utterance.
    pub fn response_created(&mut self) {
        self.transition(TurnState::Receiving, "response created");
    }

    pub fn response_done(&mut self) {
        self.transition(TurnState::Recording, "response done");
    }

    pub fn rate_limits_updated(&mut self) {
        self.transition(TurnState::Recording, "rate limits updated");
    }
}
