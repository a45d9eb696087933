//! Process-isolated batch evaluation.
//!
//! Installing a profile on a process is one-way, and some probes mutate
//! system state, so every evaluation forks a fresh worker. The worker
//! confines itself, probes the events in index order, writes one decision
//! byte per event into a shared memory buffer and exits; the parent waits,
//! validates the buffer and copies the decisions out. A worker serves
//! exactly one profile and is never reused.

use std::ffi::c_void;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::libc;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

use crate::error::{OracleError, Result};
use crate::event::LogEntry;
use crate::ruleset::{sbpl, RuleSet};

use super::{BatchOracle, Decision, WorkerProbe, SENTINEL};

/// Shared anonymous mapping the worker writes decisions into. The parent
/// only reads it after `waitpid` returns, and a single worker exists at a
/// time, so there is no concurrent access.
struct SharedBuffer {
    ptr: NonNull<c_void>,
    len: usize,
}

impl SharedBuffer {
    fn new(len: usize) -> Result<Self> {
        let len = align_to_pagesize(len);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(OracleError::Mmap(Errno::last()).into());
        }
        let ptr = NonNull::new(ptr).expect("mmap returned a non-null mapping");
        Ok(Self { ptr, len })
    }

    fn len(&self) -> usize {
        self.len
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.len) }
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr.as_ptr(), self.len) } != 0 {
            log::warn!("failed to unmap result buffer: {}", Errno::last());
        }
    }
}

// The mapping is owned and the raw pointer is only dereferenced through the
// accessors above.
unsafe impl Send for SharedBuffer {}

fn align_to_pagesize(size: usize) -> usize {
    let page = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
    let page = if page > 0 { page as usize } else { 4096 };
    (size + page - 1) & !(page - 1)
}

/// The batch oracle: one short-lived worker per call.
///
/// Generic over the in-worker evaluator so the same machinery drives both
/// the kernel-query probe and the active-recheck probe.
pub struct ForkingOracle<P> {
    probe: P,
    buffer: Option<SharedBuffer>,
}

impl<P: WorkerProbe> ForkingOracle<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            buffer: None,
        }
    }

    /// The allocation is reused across calls when large enough.
    fn ensure_buffer(&mut self, events: usize) -> Result<()> {
        let needed = events.max(1);
        let adequate = self.buffer.as_ref().is_some_and(|b| b.len() >= needed);
        if !adequate {
            self.buffer = Some(SharedBuffer::new(needed)?);
        }
        Ok(())
    }
}

impl<P: WorkerProbe> BatchOracle for ForkingOracle<P> {
    fn evaluate(&mut self, rules: &RuleSet, events: &[LogEntry]) -> Result<Vec<Decision>> {
        let profile = sbpl::dump(rules)?;
        let default_allow = rules.is_default_allow();

        self.ensure_buffer(events.len())?;
        let Self { probe, buffer } = self;
        let buffer = buffer.as_mut().expect("buffer allocated above");
        buffer.bytes_mut().fill(SENTINEL);

        log::debug!(
            "evaluating {} events against a {}-rule profile",
            events.len(),
            rules.len()
        );

        match unsafe { fork() }.map_err(OracleError::Fork)? {
            ForkResult::Child => {
                // The worker reports decisions through the buffer and
                // everything else through its exit status; it must never
                // return into the caller's stack.
                let status = match probe.confine(&profile, default_allow) {
                    Ok(()) => {
                        let slots = buffer.bytes_mut();
                        for (i, entry) in events.iter().enumerate() {
                            slots[i] = probe.decide(entry).as_byte();
                        }
                        0
                    }
                    Err(message) => {
                        eprintln!("sbmatch worker: failed to install profile: {message}");
                        1
                    }
                };
                std::process::exit(status);
            }
            ForkResult::Parent { child } => {
                match waitpid(child, None).map_err(OracleError::Wait)? {
                    WaitStatus::Exited(_, 0) => {}
                    WaitStatus::Exited(_, status) => {
                        return Err(OracleError::WorkerFailed { status }.into());
                    }
                    WaitStatus::Signaled(_, signal, _) => {
                        log::error!("worker killed by {signal}; offending profile:\n{profile}");
                        return Err(OracleError::WorkerSignaled {
                            signal: signal.to_string(),
                        }
                        .into());
                    }
                    status => {
                        log::error!("unexpected worker status: {status:?}");
                        return Err(OracleError::WorkerFailed { status: -1 }.into());
                    }
                }

                let mut decisions = Vec::with_capacity(events.len());
                for (i, &byte) in buffer.bytes()[..events.len()].iter().enumerate() {
                    if byte == SENTINEL {
                        return Err(OracleError::SentinelLeak { index: i }.into());
                    }
                    match Decision::from_byte(byte) {
                        Some(decision) => decisions.push(decision),
                        None => return Err(OracleError::BadDecisionByte { index: i, byte }.into()),
                    }
                }
                Ok(decisions)
            }
        }
    }
}
