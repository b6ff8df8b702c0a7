//! Error kinds that callers must tell apart.
//!
//! Everything else travels as a plain `anyhow::Error` with context. These
//! variants are wrapped in `anyhow::Error` too and recovered with
//! `downcast_ref` where the disposition differs (exit code 130, iteration
//! failure vs. abort).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Rejected before any work started (no events emitted).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The assistant process exited unsuccessfully.
    #[error("claude exited with {}", describe_exit(.code))]
    ChildFailure { code: Option<i32> },

    /// A stdout line was not a valid protocol frame.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The judge never named exactly one of the two candidates.
    #[error(
        "could not determine the losing branch after {attempts} attempt(s); last response: {last_response:?}"
    )]
    UnparsableJudgement { attempts: u32, last_response: String },

    /// A git command exited non-zero.
    #[error("git {command} failed: {output}")]
    Vcs { command: String, output: String },

    /// A signal was observed at a suspension point.
    #[error("interrupted")]
    Interrupted,
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// True if `err` (or anything in its chain) is [`RunError::Interrupted`].
pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RunError>(),
            Some(RunError::Interrupted)
        )
    })
}
