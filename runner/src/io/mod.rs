//! Side-effecting adapters: the assistant process, git, config and signals.

pub mod claude;
pub mod config;
pub mod git;
pub mod signals;
