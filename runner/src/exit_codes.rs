//! Stable exit codes for claude-runner commands.

/// Command completed.
pub const OK: i32 = 0;
/// Invalid input, child/protocol/git failure, unparseable judgement, or any other error.
pub const FAILURE: i32 = 1;
/// Interrupted by SIGINT/SIGTERM at a suspension point (128 + SIGINT).
pub const INTERRUPTED: i32 = 130;

/// Map a command result to its exit code.
pub fn for_result(result: &anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => OK,
        Err(err) if crate::error::is_interrupted(err) => INTERRUPTED,
        Err(_) => FAILURE,
    }
}
