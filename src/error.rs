//! Error taxonomy for the interview engine.
//!
//! Collaborator errors (`LedgerError`, `StoreError`, `TranscriptionError`)
//! convert into `SessionError`, which is what the state machine surfaces.

use crate::machine::{Action, MachineState};

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no preps remaining")]
    InsufficientBalance,

    #[error("persistence failed: {reason}")]
    PersistenceFailure { reason: String },

    #[error("an interview session is already active for this user")]
    SessionAlreadyActive,

    #[error("recording already active for question {active}, cannot start question {requested}")]
    RecordingAlreadyActive { active: usize, requested: usize },

    #[error("already at the last question (index {index})")]
    AtEnd { index: usize },

    #[error("{action} is not allowed while {state}")]
    IllegalAction { action: Action, state: MachineState },

    #[error("a session needs at least one question")]
    EmptyQuestionSet,

    #[error("session runner has shut down")]
    SessionClosed,
}

/// How an error should be treated by whoever shows it to a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    UserActionable,
    Transient,
    ContractViolation,
}

pub const GENERIC_MESSAGE: &str = "Something went wrong, please retry.";

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::InsufficientBalance => ErrorClass::UserActionable,
            SessionError::PersistenceFailure { .. } | SessionError::SessionClosed => {
                ErrorClass::Transient
            }
            SessionError::SessionAlreadyActive
            | SessionError::RecordingAlreadyActive { .. }
            | SessionError::AtEnd { .. }
            | SessionError::IllegalAction { .. }
            | SessionError::EmptyQuestionSet => ErrorClass::ContractViolation,
        }
    }

    pub fn is_contract_violation(&self) -> bool {
        self.class() == ErrorClass::ContractViolation
    }

    pub fn user_message(&self) -> String {
        match self {
            SessionError::InsufficientBalance => {
                "You're out of interview preps. Buy a pack to keep practicing.".to_string()
            }
            SessionError::PersistenceFailure { .. } => {
                "Could not reach the server, retrying...".to_string()
            }
            _ => GENERIC_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("a session is already active for this user")]
    SessionAlreadyActive,

    #[error("ledger persistence failed: {0}")]
    Persistence(String),
}

impl From<LedgerError> for SessionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance => SessionError::InsufficientBalance,
            LedgerError::SessionAlreadyActive => SessionError::SessionAlreadyActive,
            LedgerError::Persistence(reason) => SessionError::PersistenceFailure { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store persistence failed: {0}")]
    Persistence(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::PersistenceFailure {
            reason: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("transcription unavailable: {0}")]
    Unavailable(String),
}
