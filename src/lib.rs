//! judgebox: a single-shot online-judge execution sandbox
//!
//! Compiles one submission, runs it inside an ephemeral cgroup v2 directory
//! pinned to a single CPU and fenced by POSIX rlimits, captures its output
//! under a wall deadline, and emits a structured verdict.

pub mod cgroup;
pub mod cli;
pub mod compile;
pub mod config;
pub mod cpu;
pub mod executor;
pub mod judge;
pub mod types;
pub mod verdict;

pub use config::Limits;
pub use types::{Result, SandboxError};
pub use verdict::{Verdict, VerdictStatus};
