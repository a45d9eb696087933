//! Bindings to the seatbelt SPI and the kernel-query worker probe.
//!
//! `sandbox_check` and `sandbox_init_with_parameters` come from
//! `libsystem_sandbox`; they are private interfaces with no shipped header,
//! so they are declared by hand here.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

use nix::libc;

use crate::event::LogEntry;

use super::{strategy, Decision, FilterCategory, WorkerProbe};

extern "C" {
    fn sandbox_init_with_parameters(
        profile: *const c_char,
        flags: u64,
        parameters: *const *const c_char,
        errorbuf: *mut *mut c_char,
    ) -> c_int;

    fn sandbox_free_error(errorbuf: *mut c_char);

    fn sandbox_check(pid: libc::pid_t, operation: *const c_char, filter_type: c_int, ...) -> c_int;
}

/// Suppresses the kernel's own violation report for the query.
const SANDBOX_CHECK_NO_REPORT: c_int = 0x4000_0000;

/// Install `profile` on the calling process. One-way: once this succeeds the
/// process can only ever tighten its sandbox further.
pub fn install_profile(profile: &str) -> std::result::Result<(), String> {
    let profile =
        CString::new(profile).map_err(|_| "profile text contains a NUL byte".to_string())?;

    let mut error: *mut c_char = std::ptr::null_mut();
    let rv =
        unsafe { sandbox_init_with_parameters(profile.as_ptr(), 0, std::ptr::null(), &mut error) };
    if rv == 0 && error.is_null() {
        return Ok(());
    }

    let message = if error.is_null() {
        format!("sandbox_init_with_parameters returned {rv}")
    } else {
        let text = unsafe { CStr::from_ptr(error) }.to_string_lossy().into_owned();
        unsafe { sandbox_free_error(error) };
        text
    };
    Err(message)
}

/// One kernel query. `None` when `sandbox_check` reports something other
/// than a decision, which is a protocol failure.
pub fn check(op: &str, category: FilterCategory, argument: Option<&str>) -> Option<bool> {
    let op_c = CString::new(op).ok()?;
    let filter = SANDBOX_CHECK_NO_REPORT | category.raw() as c_int;
    let pid = nix::unistd::getpid().as_raw();

    let rv = match argument {
        Some(argument) => {
            let argument_c = CString::new(argument).ok()?;
            unsafe { sandbox_check(pid, op_c.as_ptr(), filter, argument_c.as_ptr()) }
        }
        None => unsafe { sandbox_check(pid, op_c.as_ptr(), filter) },
    };

    match rv {
        0 => Some(true),
        1 => Some(false),
        other => {
            log::error!("sandbox_check returned {other} for {op} ({category:?})");
            None
        }
    }
}

/// Worker probe that asks the kernel interface about each event.
#[derive(Debug, Default)]
pub struct KernelProbe {
    default_allow: bool,
}

impl KernelProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerProbe for KernelProbe {
    fn confine(&mut self, profile: &str, default_allow: bool) -> std::result::Result<(), String> {
        self.default_allow = default_allow;
        install_profile(profile)
    }

    fn decide(&mut self, entry: &LogEntry) -> Decision {
        strategy::decide(check, entry, self.default_allow)
    }
}
