//! Error types for dispatch, matching, and persistence.

use crate::store::StoreError;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the dispatch engine to adapters and application code.
///
/// "No handler matched" is not an error; see [`crate::Outcome::Unhandled`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A text-capable event arrived without usable text.
    #[error("cannot normalize message: {0}")]
    Normalization(String),

    /// The adapter delivered an event kind the router does not know how to dispatch.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The persistence collaborator failed; never swallowed.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// A vague matcher or condition pattern did not compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A vague container needs at least one matcher.
    #[error("vague container requires at least one matcher")]
    EmptyMatchers,

    /// No user with this id has been seen yet.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Application handler failed. Passed through to the adapter unchanged.
    #[error(transparent)]
    Handler(anyhow::Error),
}
