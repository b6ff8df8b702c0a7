//! Orchestrates the `claude` CLI as a child process.
//!
//! Two strategies share one event pipeline:
//!
//! - **[`looping`]**: run the same prompt a fixed number of times, with
//!   interruptible pauses in between.
//! - **[`evolve`]**: a single-elimination tournament over git branches where
//!   the assistant implements, improves and judges its own work.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (protocol frames, judge parsing, branch names,
//!   durations, prompt text). No I/O.
//! - **[`io`]**: Side effects (the claude process, git, config, signals),
//!   behind traits so controllers can be tested with scripted doubles.
//! - **[`events`]**: The bounded bus between the controllers and the
//!   [`render`] task.

pub mod core;
pub mod error;
pub mod events;
pub mod evolve;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod render;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
