//! Ledger error types
//!
//! A single `thiserror`-derived hierarchy distinguishes deterministic
//! rejections (never retried, always leave a persisted Event) from
//! transient faults (retried by the retry controller up to `MAX_RETRIES`).

use thiserror::Error;

/// Deterministic rejection reasons, stable across releases since their
/// `Display` text is published verbatim in error outcome events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    UnparsableContent,
    BadDelegation,
    NonPositiveAmount,
    UnsupportedToken,
    UnsupportedType,
    UnauthorizedMint,
    UnauthorizedBurn,
    InsufficientFunds,
}

impl RejectionReason {
    /// Text published in the `{"messages":[...]}` body of an error outcome event.
    pub fn message(&self) -> &'static str {
        match self {
            RejectionReason::UnparsableContent => "Unparsable content",
            RejectionReason::BadDelegation => "Bad delegation",
            RejectionReason::NonPositiveAmount => "Token amount must be a positive number",
            RejectionReason::UnsupportedToken => "Token not supported",
            RejectionReason::UnsupportedType => "Transaction not supported",
            RejectionReason::UnauthorizedMint => "Author cannot mint this token",
            RejectionReason::UnauthorizedBurn => "Author cannot burn this token",
            RejectionReason::InsufficientFunds => "Not enough funds",
        }
    }
}

/// Top-level error type threaded through C4/C5/C6.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Deterministic rejection: never retried, always terminal.
    #[error("rejected: {}", .0.message())]
    Rejection(RejectionReason),

    /// Transient fault: the retry controller re-enters the handler from
    /// the top, up to `MAX_RETRIES` times.
    #[error("transient fault: {0}")]
    Transient(String),

    /// The event was a duplicate of an already-processed request.
    /// Not an error: the caller drops silently (see `RequestOutcome::Duplicate`).
    #[error("duplicate request")]
    Duplicate,
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }

    pub fn rejection(reason: RejectionReason) -> Self {
        LedgerError::Rejection(reason)
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                // Concurrent CreateFresh race: the peer already created the row.
                // Treated as transient so the retry loop re-runs and Credits it.
                LedgerError::Transient(format!("unique violation: {db_err}"))
            }
            _ => LedgerError::Transient(e.to_string()),
        }
    }
}

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
