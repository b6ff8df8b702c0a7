//! Prompt text the runner composes itself.

use crate::error::RunError;

/// Reject prompts that are empty or whitespace only.
pub fn validate_prompt(prompt: &str) -> Result<(), RunError> {
    if prompt.trim().is_empty() {
        return Err(RunError::InvalidInput("prompt must not be empty".to_string()));
    }
    Ok(())
}

/// Append the ballot for the judge to the user's comparison prompt.
///
/// The wording is part of the judge contract: it lists exactly the two
/// candidates and asks for the loser's name alone.
pub fn judge_prompt(compare_prompt: &str, first: &str, second: &str) -> String {
    format!(
        "{compare_prompt}\n\n- {first}\n- {second}\nRespond with ONLY the branch name of the worse implementation, nothing else."
    )
}

/// Commit message for the squashed initial implementation.
pub fn implement_message(plan: &str) -> String {
    format!("implement: {}", truncate(plan, 50))
}

/// Commit message for a squashed improvement round.
pub fn improve_message(round: u32) -> String {
    format!("improve: round {round}")
}

/// Keep the first `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
