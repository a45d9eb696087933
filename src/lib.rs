//! sbmatch attributes observed sandbox log entries to the rules of the
//! profile that produced them.
//!
//! The engine treats the kernel's sandbox as a black-box oracle: it installs
//! progressively shorter renditions of the profile on freshly forked
//! workers, evaluates the whole event batch against each, and attributes an
//! event to the rule whose removal changed the oracle's decision. The batch
//! oracle is a trait, so tests substitute a simulated oracle and never fork.

pub mod cli;
pub mod engine;
pub mod error;
pub mod event;
pub mod ops;
pub mod oracle;
#[cfg(target_os = "macos")]
pub mod probe;
pub mod report;
pub mod ruleset;
