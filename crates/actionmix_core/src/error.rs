//! Error taxonomy for dispatched actions.

use crate::key::Key;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for dispatch operations.
pub type MixResult<T> = Result<T, ActionError>;

/// The kind of a user-facing exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserExceptionKind {
    /// An expected, displayable failure raised by an action.
    General,
    /// Raised by the check-internet policy when connectivity fails.
    NoConnectivity,
}

/// An expected, displayable error.
///
/// When it leaves a dispatch, `if_open_dialog` decides its fate: `true`
/// queues it on the error queue for the UI to show, `false` returns it to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserException {
    /// The message shown to the user.
    pub message: String,
    /// Optional secondary text (details, hint).
    pub reason: Option<String>,
    /// What raised it.
    pub kind: UserExceptionKind,
    /// Whether it is queued for display (`true`) or returned (`false`).
    pub if_open_dialog: bool,
}

impl UserException {
    /// Creates a user exception that will be queued for display.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
            kind: UserExceptionKind::General,
            if_open_dialog: true,
        }
    }

    /// Creates the connectivity exception raised by the check-internet policy.
    pub fn no_connectivity(if_open_dialog: bool) -> Self {
        Self {
            message: "There is no Internet".into(),
            reason: Some("Please, verify your connection.".into()),
            kind: UserExceptionKind::NoConnectivity,
            if_open_dialog,
        }
    }

    /// Sets the secondary text.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets whether the exception is queued for display.
    pub fn with_dialog(mut self, if_open_dialog: bool) -> Self {
        self.if_open_dialog = if_open_dialog;
        self
    }

    /// Returns true if this is the connectivity exception.
    pub fn is_no_connectivity(&self) -> bool {
        self.kind == UserExceptionKind::NoConnectivity
    }
}

impl fmt::Display for UserException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({reason})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for UserException {}

/// Misuse of the library. Never queued, retried or swallowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgrammingError {
    /// An optimistic-sync chain kept diverging past its follow-up budget.
    #[error("optimistic sync for {key} exceeded {limit} follow-up requests")]
    FollowUpLimitExceeded {
        /// The dispatch key.
        key: Key,
        /// The configured limit.
        limit: usize,
    },

    /// A push-aware send returned without reporting the server revision.
    #[error("send for {key} returned without informing the server revision")]
    ServerRevisionNotInformed {
        /// The dispatch key.
        key: Key,
    },

    /// A config value that can never work.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },
}

/// Errors produced by dispatched actions and by the dispatcher itself.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// An expected, displayable failure.
    #[error("{0}")]
    User(#[from] UserException),

    /// Library misuse; always propagates.
    #[error("programming error: {0}")]
    Programming(#[from] ProgrammingError),

    /// Anything else. Always returned to the caller.
    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync>),
}

impl ActionError {
    /// Wraps an arbitrary error.
    pub fn other(error: impl StdError + Send + Sync + 'static) -> Self {
        ActionError::Other(Arc::new(error))
    }

    /// Creates an arbitrary error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        ActionError::Other(Arc::new(Message(message.into())))
    }

    /// Returns the user exception, if this is one.
    pub fn as_user(&self) -> Option<&UserException> {
        match self {
            ActionError::User(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true for programming errors.
    pub fn is_programming(&self) -> bool {
        matches!(self, ActionError::Programming(_))
    }

    /// Returns true if a retry policy may retry after this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_programming()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}
