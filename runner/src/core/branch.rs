//! Branch identifiers for tournament candidates.
//!
//! Names are `impl-` plus six lowercase hex characters. They double as the
//! ballot tokens shown to the judge, so they must stay short and distinct
//! from ordinary prose.

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::warn;

pub const BRANCH_PREFIX: &str = "impl-";

/// Source of fresh branch names.
pub trait BranchNames {
    fn next_name(&mut self) -> String;
}

/// Names from 3 bytes of OS randomness, falling back to the clock.
#[derive(Debug, Default)]
pub struct RandomBranchNames;

impl BranchNames for RandomBranchNames {
    fn next_name(&mut self) -> String {
        let mut bytes = [0u8; 3];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => name_from_bytes(bytes),
            Err(err) => {
                warn!(err = %err, "os randomness unavailable, using timestamp branch name");
                timestamp_name()
            }
        }
    }
}

/// Fixed sequence of names, for deterministic runs.
#[derive(Debug, Clone)]
pub struct FixedBranchNames {
    names: std::collections::VecDeque<String>,
}

impl FixedBranchNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl BranchNames for FixedBranchNames {
    /// Falls back to random names once the sequence is exhausted.
    fn next_name(&mut self) -> String {
        self.names
            .pop_front()
            .unwrap_or_else(|| RandomBranchNames.next_name())
    }
}

pub fn name_from_bytes(bytes: [u8; 3]) -> String {
    format!("{BRANCH_PREFIX}{}", hex::encode(bytes))
}

fn timestamp_name() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let low = (nanos as u64 & 0x00ff_ffff) as u32;
    format!("{BRANCH_PREFIX}{low:06x}")
}

/// True if `name` has the shape of a generated branch name.
pub fn is_branch_name(name: &str) -> bool {
    name.strip_prefix(BRANCH_PREFIX).is_some_and(|suffix| {
        suffix.len() == 6
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    })
}
