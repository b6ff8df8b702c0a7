//! Extract the losing branch from the judge's free-form answer.
//!
//! Two rules, in order: exactly one candidate appears anywhere in the answer;
//! otherwise the trimmed last line is exactly one candidate. Anything else is
//! unparseable and the caller decides whether to ask again.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JudgeParseError {
    #[error("response names both {first} and {second}")]
    Both { first: String, second: String },
    #[error("response names neither {first} nor {second}")]
    Neither { first: String, second: String },
}

/// Return whichever of `first` / `second` the response selects.
pub fn parse_loser<'a>(
    response: &str,
    first: &'a str,
    second: &'a str,
) -> Result<&'a str, JudgeParseError> {
    let response = response.trim();
    let has_first = response.contains(first);
    let has_second = response.contains(second);

    match (has_first, has_second) {
        (true, false) => return Ok(first),
        (false, true) => return Ok(second),
        _ => {}
    }

    let last_line = response.lines().last().unwrap_or_default().trim();
    if last_line == first {
        return Ok(first);
    }
    if last_line == second {
        return Ok(second);
    }

    let (first, second) = (first.to_string(), second.to_string());
    if has_first {
        Err(JudgeParseError::Both { first, second })
    } else {
        Err(JudgeParseError::Neither { first, second })
    }
}
