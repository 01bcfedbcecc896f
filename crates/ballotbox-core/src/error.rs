use thiserror::Error;

/// Failure kinds for poll operations. Every failure is terminal for its
/// call — nothing here is retried internally.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(&'static str),

    #[error("{0}")]
    AccessDenied(&'static str),

    #[error("{0}")]
    Expired(&'static str),

    #[error("You have already voted on this poll")]
    DuplicateVote,

    /// Storage or data-corruption failure; not a caller mistake.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
