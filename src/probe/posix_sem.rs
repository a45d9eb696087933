//! Probes for the `ipc-posix-sem-*` operations.
//!
//! `nix` has no named-semaphore wrappers, so these go through `libc`
//! directly. All probes close what they open; `create` also unlinks the
//! semaphore it created.

use std::ffi::CString;

use nix::errno::Errno;
use nix::libc;

use crate::oracle::Decision;

fn name_c(name: &str) -> Option<CString> {
    CString::new(name).ok()
}

pub fn create(name: &str) -> Decision {
    let Some(name_c) = name_c(name) else {
        return Decision::Error;
    };

    // A pre-existing semaphore makes the creation test meaningless; try to
    // clear it first and give up when that is not possible.
    let existing = unsafe { libc::sem_open(name_c.as_ptr(), 0) };
    if existing != libc::SEM_FAILED {
        unsafe { libc::sem_close(existing) };
        if unsafe { libc::sem_unlink(name_c.as_ptr()) } != 0 {
            return Decision::Error;
        }
    } else if Errno::last() == Errno::EPERM {
        return Decision::Error;
    }

    let semaphore = unsafe {
        libc::sem_open(
            name_c.as_ptr(),
            libc::O_CREAT,
            0o777 as libc::c_uint,
            1 as libc::c_uint,
        )
    };
    if semaphore == libc::SEM_FAILED {
        return if Errno::last() == Errno::EPERM {
            Decision::Deny
        } else {
            log::debug!("cannot create semaphore {name}: {}", Errno::last());
            Decision::Error
        };
    }

    unsafe {
        libc::sem_close(semaphore);
        libc::sem_unlink(name_c.as_ptr());
    }
    Decision::Allow
}

/// No sound probe exists for `ipc-posix-sem-open`: opening to find out
/// triggers further sandbox operations whose denial is indistinguishable
/// from the one under test.
pub fn open(_name: &str) -> Decision {
    Decision::Error
}

pub fn post(name: &str) -> Decision {
    let Some(name_c) = name_c(name) else {
        return Decision::Error;
    };
    let semaphore = unsafe { libc::sem_open(name_c.as_ptr(), 0) };
    if semaphore == libc::SEM_FAILED {
        log::debug!("cannot open semaphore {name}: {}", Errno::last());
        return Decision::Error;
    }

    let posted = unsafe { libc::sem_post(semaphore) } == 0;
    unsafe { libc::sem_close(semaphore) };
    if posted {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

pub fn wait(name: &str) -> Decision {
    let Some(name_c) = name_c(name) else {
        return Decision::Error;
    };
    let semaphore = unsafe { libc::sem_open(name_c.as_ptr(), 0) };
    if semaphore == libc::SEM_FAILED {
        log::debug!("cannot open semaphore {name}: {}", Errno::last());
        return Decision::Error;
    }

    // try-wait so a denied semaphore cannot block the worker; EAGAIN means
    // the wait itself was permitted, the semaphore just had no token.
    let rv = unsafe { libc::sem_trywait(semaphore) };
    let denied = rv != 0 && Errno::last() != Errno::EAGAIN;
    unsafe { libc::sem_close(semaphore) };
    if denied {
        Decision::Deny
    } else {
        Decision::Allow
    }
}

pub fn unlink(name: &str) -> Decision {
    let Some(name_c) = name_c(name) else {
        return Decision::Error;
    };
    // Unlinking fails when the semaphore no longer exists; probing for it
    // first would trigger another sandbox operation, so that case stays
    // undecided.
    if unsafe { libc::sem_unlink(name_c.as_ptr()) } == 0 {
        return Decision::Allow;
    }
    if Errno::last() == Errno::EPERM {
        Decision::Deny
    } else {
        Decision::Error
    }
}
