//! Probes for the `process-info-*` operations, via libproc. The recorded
//! argument is a PID the worker cannot impersonate, so the probes target the
//! worker itself: the profile rules under test constrain the operation, not
//! the particular target process.

use std::ffi::c_void;
use std::os::raw::c_int;

use nix::libc;

use crate::oracle::Decision;

extern "C" {
    fn proc_get_dirty(pid: libc::pid_t, flags: *mut u32) -> c_int;
    fn proc_setpcontrol(control: c_int) -> c_int;
    fn proc_pidinfo(
        pid: libc::pid_t,
        flavor: c_int,
        arg: u64,
        buffer: *mut c_void,
        buffersize: c_int,
    ) -> c_int;
}

const PROC_SETPC_NONE: c_int = 0;
const PROC_PIDTBSDINFO: c_int = 3;
/// sizeof(struct proc_bsdinfo)
const PROC_PIDTBSDINFO_SIZE: c_int = 136;

pub fn dirtycontrol(_argument: &str) -> Decision {
    let mut flags: u32 = 0;
    let rv = unsafe { proc_get_dirty(nix::unistd::getpid().as_raw(), &mut flags) };
    if rv == 0 {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

pub fn setcontrol(_argument: &str) -> Decision {
    let rv = unsafe { proc_setpcontrol(PROC_SETPC_NONE) };
    if rv == 0 {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

pub fn pidinfo(_argument: &str) -> Decision {
    let mut info = [0u8; PROC_PIDTBSDINFO_SIZE as usize];
    let rv = unsafe {
        proc_pidinfo(
            nix::unistd::getpid().as_raw(),
            PROC_PIDTBSDINFO,
            0,
            info.as_mut_ptr().cast(),
            PROC_PIDTBSDINFO_SIZE,
        )
    };
    if rv == PROC_PIDTBSDINFO_SIZE {
        Decision::Allow
    } else {
        Decision::Deny
    }
}
