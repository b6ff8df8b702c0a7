//! Deterministic, pure logic shared by the runner.
//!
//! Core modules must be free of process and filesystem side effects. They
//! operate on in-memory data and return deterministic outputs suitable for
//! tests. (Branch naming reads OS randomness, nothing else.)

pub mod branch;
pub mod duration;
pub mod judge;
pub mod prompt;
pub mod protocol;
