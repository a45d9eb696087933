//! Active rechecks: perform the operation instead of asking the kernel.
//!
//! The kernel-query interface answers some operations too leniently, and
//! events with ambiguous filter categories cannot be decided by a query at
//! all. The probes here attempt the operation itself (open the semaphore,
//! open the service, fork and signal) and observe the sandbox's response.
//! They run inside a worker that is about to exit, but still clean up what
//! they create on every decision branch.

pub mod file_ext;
pub mod iokit;
pub mod nvram;
pub mod posix_sem;
pub mod posix_shm;
pub mod process_info;
pub mod signal;

use crate::event::LogEntry;
use crate::oracle::{kernel, strategy, Decision, FilterCategory, WorkerProbe};

type ProbeFn = fn(&str) -> Decision;

const PROBES: &[(&str, ProbeFn)] = &[
    ("file-issue-extension", file_ext::issue_extension),
    ("ipc-posix-shm-write-create", posix_shm::write_create),
    ("ipc-posix-shm-write-data", posix_shm::write_data),
    ("ipc-posix-shm-write-unlink", posix_shm::write_unlink),
    ("ipc-posix-shm-read-data", posix_shm::read_data),
    ("ipc-posix-shm-read-metadata", posix_shm::read_metadata),
    ("ipc-posix-sem-create", posix_sem::create),
    ("ipc-posix-sem-open", posix_sem::open),
    ("ipc-posix-sem-post", posix_sem::post),
    ("ipc-posix-sem-wait", posix_sem::wait),
    ("ipc-posix-sem-unlink", posix_sem::unlink),
    ("nvram-get", nvram::get),
    ("process-info-dirtycontrol", process_info::dirtycontrol),
    ("process-info-setcontrol", process_info::setcontrol),
    ("process-info-pidinfo", process_info::pidinfo),
    ("signal", signal::signal_child),
    ("iokit-open", iokit::open),
    ("mach-register", mach_register),
];

// Registering a mach name cannot be probed by actually registering it (the
// name would stay claimed), so this one stays a kernel query pinned to the
// global-name category.
fn mach_register(argument: &str) -> Decision {
    match kernel::check("mach-register", FilterCategory::GlobalName, Some(argument)) {
        Some(true) => Decision::Allow,
        Some(false) => Decision::Deny,
        None => Decision::Error,
    }
}

/// Run the active probe for `operation`, if one exists.
pub fn perform(operation: &str, argument: &str) -> Option<Decision> {
    PROBES
        .iter()
        .find(|(op, _)| *op == operation)
        .map(|(_, probe)| probe(argument))
}

/// Worker probe that performs operations, falling back to the kernel query
/// for operations without an active probe.
#[derive(Debug, Default)]
pub struct PerformProbe {
    default_allow: bool,
}

impl PerformProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerProbe for PerformProbe {
    fn confine(&mut self, profile: &str, default_allow: bool) -> std::result::Result<(), String> {
        self.default_allow = default_allow;
        kernel::install_profile(profile)
    }

    fn decide(&mut self, entry: &LogEntry) -> Decision {
        match perform(&entry.operation, entry.argument_str()) {
            Some(decision) => decision,
            None => strategy::decide(kernel::check, entry, self.default_allow),
        }
    }
}
