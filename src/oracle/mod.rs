//! The sandbox decision oracle: decision alphabet, kernel filter categories,
//! the per-event probing strategy and the process-isolated batch evaluator.

use crate::error::Result;
use crate::event::{Action, LogEntry};
use crate::ruleset::RuleSet;

#[cfg(target_os = "macos")]
pub mod kernel;
pub mod strategy;
pub mod worker;

pub use worker::ForkingOracle;

/// Pre-fill byte for the shared result buffer. Distinct from every legal
/// decision byte so unwritten slots are detectable after the worker exits.
pub const SENTINEL: u8 = 0x02;

/// A single oracle decision.
///
/// `Unknown` means the oracle cannot be consulted soundly for the event
/// (ambiguous filter category on a default-allow profile); `Error` means the
/// oracle signalled a protocol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Decision {
    Allow = 0x00,
    Deny = 0x01,
    Unknown = 0x03,
    Error = 0x04,
}

impl Decision {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Decision> {
        match byte {
            0x00 => Some(Decision::Allow),
            0x01 => Some(Decision::Deny),
            0x03 => Some(Decision::Unknown),
            0x04 => Some(Decision::Error),
            _ => None,
        }
    }

    /// Whether this is a real allow/deny verdict rather than a failure mode.
    pub fn is_definitive(self) -> bool {
        matches!(self, Decision::Allow | Decision::Deny)
    }

    /// Whether the decision confirms the observed action. Unknown and error
    /// decisions confirm nothing.
    pub fn agrees_with(self, action: Action) -> bool {
        matches!(
            (self, action),
            (Decision::Allow, Action::Allow) | (Decision::Deny, Action::Deny)
        )
    }
}

/// The kernel-side dispatch key selecting how `sandbox_check` compares an
/// argument. Logs record a single resource string per event, so exactly one
/// category must be picked per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterCategory {
    None,
    Path,
    GlobalName,
    LocalName,
    AppleeventDestination,
    RightName,
    PreferenceDomain,
    KextBundleId,
    InfoType,
    Notification,
    Unknown,
}

impl FilterCategory {
    /// The nine argument-taking categories, in kernel order.
    pub const CONCRETE: [FilterCategory; 9] = [
        FilterCategory::Path,
        FilterCategory::GlobalName,
        FilterCategory::LocalName,
        FilterCategory::AppleeventDestination,
        FilterCategory::RightName,
        FilterCategory::PreferenceDomain,
        FilterCategory::KextBundleId,
        FilterCategory::InfoType,
        FilterCategory::Notification,
    ];

    /// Pick the category for one oracle query about `op`.
    ///
    /// `file*` operations always compare paths. `mach-register` could be a
    /// local or a global registration, but the logs do not say which; the
    /// application profile always allows local names, so querying global-name
    /// keeps false matches down at the cost of extra inconsistent results.
    /// Everything else is ambiguous.
    pub fn for_operation(op: &str, has_argument: bool) -> FilterCategory {
        if !has_argument {
            return FilterCategory::None;
        }
        if op.starts_with("file") {
            return FilterCategory::Path;
        }
        if op.starts_with("mach-register") {
            return FilterCategory::GlobalName;
        }
        FilterCategory::Unknown
    }

    /// The kernel enum value for `sandbox_check`. `Unknown` is our own
    /// sentinel, never handed to the kernel; the probing strategy resolves
    /// it into a concrete-category sweep first.
    pub fn raw(self) -> i32 {
        match self {
            FilterCategory::None => 0,
            FilterCategory::Path => 1,
            FilterCategory::GlobalName => 2,
            FilterCategory::LocalName => 3,
            FilterCategory::AppleeventDestination => 4,
            FilterCategory::RightName => 5,
            FilterCategory::PreferenceDomain => 6,
            FilterCategory::KextBundleId => 7,
            FilterCategory::InfoType => 8,
            FilterCategory::Notification => 9,
            FilterCategory::Unknown => -1,
        }
    }
}

/// Per-event evaluator running inside a confined worker.
///
/// `confine` is called exactly once, right after the fork; tightening the
/// sandbox is one-way, which is why the worker only ever serves a single
/// profile.
pub trait WorkerProbe: Send {
    fn confine(&mut self, profile: &str, default_allow: bool) -> std::result::Result<(), String>;

    fn decide(&mut self, entry: &LogEntry) -> Decision;
}

/// A batch decision oracle.
///
/// Abstract so that simulated oracles can stand in for the forking one in
/// tests. Takes the structured rule set rather than profile text because the
/// probing strategy needs to know whether the policy being installed is
/// default-allow; implementations serialise internally.
pub trait BatchOracle {
    fn evaluate(&mut self, rules: &RuleSet, events: &[LogEntry]) -> Result<Vec<Decision>>;
}
