use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What went wrong, at the granularity callers branch on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input (empty reason, invalid coordinate). Never sent to the backend.
    Validation,
    /// The backend reports the order is already in the requested state.
    Conflict,
    /// Another agent claimed the order first.
    AlreadyClaimed,
    /// Another operation on the same entity is still in flight.
    Busy,
    /// No connectivity or a transport failure.
    Network,
    /// The backend call exceeded its deadline.
    Timeout,
    /// No credential is available.
    Unauthenticated,
    /// The backend rejected the credential.
    SessionExpired,
    /// The operation is not legal from the current state.
    InvalidState,
    /// Going offline while an order is being executed.
    ActiveOrderInProgress,
    /// The backend does not know the requested entity.
    NotFound,
    /// An engine component is not running anymore.
    Unavailable,
}

/// Coarse error families, used when reporting to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    Network,
    Auth,
    InvalidState,
}

/// Whether repeating the failed operation is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAdvice {
    /// Nothing reached the backend, or the operation is read-only.
    Safe,
    /// Retry once a valid credential is available again.
    AfterReauth,
    /// The request may have been applied; repeating it could double-submit.
    MayDoubleSubmit,
    /// Repeating yields the same failure.
    Never,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::Validation => ErrorCategory::Validation,
            ErrorKind::Conflict | ErrorKind::AlreadyClaimed => ErrorCategory::Conflict,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Unavailable => {
                ErrorCategory::Network
            }
            ErrorKind::Unauthenticated | ErrorKind::SessionExpired => ErrorCategory::Auth,
            ErrorKind::Busy
            | ErrorKind::InvalidState
            | ErrorKind::ActiveOrderInProgress
            | ErrorKind::NotFound => ErrorCategory::InvalidState,
        }
    }

    pub fn is_auth(self) -> bool {
        self.category() == ErrorCategory::Auth
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Error returned by every engine operation and by the backend contracts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
    /// Set when the failing operation mutates backend state.
    pub mutating: bool,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            mutating: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn already_claimed(order_id: &str) -> Self {
        Self::new(
            ErrorKind::AlreadyClaimed,
            format!("order {} was claimed by another agent", order_id),
        )
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "no credential available")
    }

    pub fn session_expired() -> Self {
        Self::new(ErrorKind::SessionExpired, "credential rejected by the backend")
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn active_order(order_id: &str) -> Self {
        Self::new(
            ErrorKind::ActiveOrderInProgress,
            format!("order {} is still in progress", order_id),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Marks the error as coming from an operation with backend side effects.
    pub fn in_mutation(mut self) -> Self {
        self.mutating = true;
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn is_auth(&self) -> bool {
        self.kind.is_auth()
    }

    pub fn retry_advice(&self) -> RetryAdvice {
        match self.kind {
            ErrorKind::Busy | ErrorKind::Unavailable => RetryAdvice::Safe,
            ErrorKind::Network | ErrorKind::Timeout if self.mutating => {
                RetryAdvice::MayDoubleSubmit
            }
            ErrorKind::Network | ErrorKind::Timeout => RetryAdvice::Safe,
            ErrorKind::Unauthenticated | ErrorKind::SessionExpired => RetryAdvice::AfterReauth,
            ErrorKind::Validation
            | ErrorKind::Conflict
            | ErrorKind::AlreadyClaimed
            | ErrorKind::InvalidState
            | ErrorKind::ActiveOrderInProgress
            | ErrorKind::NotFound => RetryAdvice::Never,
        }
    }
}

impl From<actix::MailboxError> for DispatchError {
    fn from(err: actix::MailboxError) -> Self {
        DispatchError::new(ErrorKind::Unavailable, format!("component unavailable: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_of_mutations_may_double_submit() {
        let read = DispatchError::network("connection reset");
        assert_eq!(read.retry_advice(), RetryAdvice::Safe);

        let write = DispatchError::timeout("accept timed out").in_mutation();
        assert_eq!(write.retry_advice(), RetryAdvice::MayDoubleSubmit);
    }

    #[test]
    fn kinds_map_onto_categories() {
        assert_eq!(ErrorKind::AlreadyClaimed.category(), ErrorCategory::Conflict);
        assert_eq!(ErrorKind::SessionExpired.category(), ErrorCategory::Auth);
        assert_eq!(
            ErrorKind::ActiveOrderInProgress.category(),
            ErrorCategory::InvalidState
        );
        assert_eq!(
            DispatchError::session_expired().retry_advice(),
            RetryAdvice::AfterReauth
        );
        assert_eq!(DispatchError::busy("x").retry_advice(), RetryAdvice::Safe);
        assert_eq!(
            DispatchError::validation("empty reason").retry_advice(),
            RetryAdvice::Never
        );
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = DispatchError::already_claimed("order123");
        assert_eq!(
            err.to_string(),
            "AlreadyClaimed: order order123 was claimed by another agent"
        );
    }
}
