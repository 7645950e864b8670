use std::time::Duration;

use thiserror::Error;

/// Reasons a probe could not produce real statistics.
///
/// These never reach callers of [`crate::Prober::probe`]; they are logged and
/// folded into a zeroed [`crate::ProbeResult`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unknown host [{0}]")]
    Resolution(String),

    #[error("failed to create ping session: {0}")]
    SessionCreate(String),

    #[error("failed to start ping: {0}")]
    SessionStart(String),

    #[error("ping session ended without reporting completion")]
    CompletionLost,

    #[error("no completion within {0:?}")]
    WaitTimeout(Duration),
}
