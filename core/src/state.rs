//! Connection lifecycle.
//!
//! # Design
//! States form a fixed total order (the discriminants are the host-visible
//! ordinals). Ordinary transitions may only move strictly forward and stop at
//! `Finished`. `Cancelled` sorts after `Finished` so the same rule lets any
//! live state move to it, while `force_cancel` covers the error and host
//! cancel paths that must win even when an error is already latched.

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum ConnectionState {
    Unknown = 0,
    Initialized = 1,
    OpeningSourceFile = 2,
    OpeningDestinationFile = 3,
    SendingRequest = 4,
    SentRequest = 5,
    /// Reserved. The pipeline never enters this state.
    Authenticating = 6,
    ReceivingData = 7,
    Finished = 8,
    Cancelled = 9,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 10] = [
        ConnectionState::Unknown,
        ConnectionState::Initialized,
        ConnectionState::OpeningSourceFile,
        ConnectionState::OpeningDestinationFile,
        ConnectionState::SendingRequest,
        ConnectionState::SentRequest,
        ConnectionState::Authenticating,
        ConnectionState::ReceivingData,
        ConnectionState::Finished,
        ConnectionState::Cancelled,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    /// `Finished` or `Cancelled`.
    pub fn is_terminal(self) -> bool {
        self >= ConnectionState::Finished
    }
}

/// Current state plus the latched error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: ConnectionState,
    error: Option<ErrorKind>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Initialized,
            error: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_state(state: ConnectionState) -> Self {
        Self { state, error: None }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Try to move to `next`. Returns whether the transition was committed.
    ///
    /// Re-entering the current state succeeds only when `allow_same` is set,
    /// which is how configuration setters assert "still configurable".
    pub fn change_state(&mut self, next: ConnectionState, allow_same: bool) -> bool {
        if self.state == ConnectionState::Unknown {
            return false;
        }
        if self.state == next {
            return allow_same;
        }
        if next <= self.state || self.state.is_terminal() {
            return false;
        }
        if self.error.is_some() {
            return false;
        }
        self.state = next;
        true
    }

    /// Move to `Cancelled` from any live state. Terminal and `Unknown` states
    /// are left untouched.
    pub fn force_cancel(&mut self) -> bool {
        if self.state == ConnectionState::Unknown || self.state.is_terminal() {
            return false;
        }
        self.state = ConnectionState::Cancelled;
        true
    }

    /// Latch `kind` unless an earlier error is already latched, then cancel.
    /// Returns whether `kind` became the latched error.
    pub fn fail(&mut self, kind: ErrorKind) -> bool {
        self.force_cancel();
        if self.error.is_some() {
            return false;
        }
        self.error = Some(kind);
        true
    }
}
