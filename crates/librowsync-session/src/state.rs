//! Session lifecycle
//!
//! ```text
//! Idle -> Handshaking -> ExchangingDeltas -> ApplyingRemote -> Committing -> Idle
//!                               ^                  |
//!                               +---- next page ---+
//! ```
//! Any state except `Failed` may move to `Failed`.

use std::fmt;

use crate::error::SessionCause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Handshaking,
    ExchangingDeltas,
    ApplyingRemote,
    Committing,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Handshaking => "handshaking",
            SessionState::ExchangingDeltas => "exchanging_deltas",
            SessionState::ApplyingRemote => "applying_remote",
            SessionState::Committing => "committing",
            SessionState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (*self, next) {
            (Failed, _) => false,
            (_, Failed) => true,
            (Idle, Handshaking)
            | (Handshaking, ExchangingDeltas)
            | (ExchangingDeltas, ApplyingRemote)
            | (ApplyingRemote, ExchangingDeltas)
            | (ApplyingRemote, Committing)
            | (Committing, Idle) => true,
            _ => false,
        }
    }

    /// Cancellation is honoured only before the commit starts
    pub fn is_cancellable(&self) -> bool {
        !matches!(self, SessionState::Committing | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state and rejects illegal transitions
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), SessionCause> {
        if !self.state.can_transition_to(next) {
            return Err(SessionCause::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Enter `Failed`, returning the stage that failed
    pub fn fail(&mut self) -> SessionState {
        let stage = self.state;
        self.state = SessionState::Failed;
        stage
    }
}
