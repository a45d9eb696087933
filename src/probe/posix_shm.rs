//! Probes for the `ipc-posix-shm-*` operations.
//!
//! The shared memory objects named in the logs were usually closed long
//! before the recheck runs, so the probes create them when necessary and
//! unlink whatever they created.

use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::oracle::Decision;

fn creation_mode() -> Mode {
    Mode::from_bits_truncate(0o777)
}

/// Open the object, creating it when it does not exist yet. The second
/// element records whether this call created the object (so the caller can
/// unlink it again).
fn open_or_create(name: &str, oflag: OFlag) -> (Decision, Option<OwnedFd>, bool) {
    debug_assert!(!oflag.contains(OFlag::O_CREAT));

    match shm_open(name, oflag, Mode::empty()) {
        Ok(fd) => (Decision::Allow, Some(fd), false),
        Err(Errno::EPERM) => (Decision::Deny, None, false),
        Err(Errno::ENOENT) => match shm_open(name, oflag | OFlag::O_CREAT, creation_mode()) {
            Ok(fd) => (Decision::Allow, Some(fd), true),
            Err(err) => {
                // Creation denied does not imply opening with these flags
                // would have been; no unambiguous answer exists.
                log::debug!("cannot create shm object {name}: {err}");
                (Decision::Unknown, None, false)
            }
        },
        Err(err) => {
            log::debug!("cannot open shm object {name}: {err}");
            (Decision::Error, None, false)
        }
    }
}

fn open_close(name: &str, oflag: OFlag) -> Decision {
    let (decision, fd, created) = open_or_create(name, oflag);
    drop(fd);
    if created {
        let _ = shm_unlink(name);
    }
    decision
}

pub fn write_create(name: &str) -> Decision {
    // A pre-existing object makes the creation test meaningless, so try to
    // clear it first.
    match shm_open(name, OFlag::O_RDONLY, Mode::empty()) {
        Ok(fd) => {
            drop(fd);
            if let Err(err) = shm_unlink(name) {
                return match err {
                    Errno::EACCES | Errno::EPERM => Decision::Deny,
                    _ => Decision::Error,
                };
            }
        }
        Err(Errno::EPERM) => return Decision::Error,
        Err(_) => {}
    }

    match shm_open(name, OFlag::O_RDWR | OFlag::O_CREAT, creation_mode()) {
        Ok(fd) => {
            drop(fd);
            let _ = shm_unlink(name);
            Decision::Allow
        }
        Err(Errno::EPERM) => Decision::Deny,
        Err(err) => {
            log::debug!("cannot create writable shm object {name}: {err}");
            Decision::Error
        }
    }
}

pub fn write_data(name: &str) -> Decision {
    open_close(name, OFlag::O_RDWR)
}

pub fn write_unlink(name: &str) -> Decision {
    match shm_unlink(name) {
        Ok(()) => Decision::Allow,
        Err(Errno::EPERM) => Decision::Deny,
        Err(err) => {
            log::debug!("cannot unlink shm object {name}: {err}");
            Decision::Error
        }
    }
}

pub fn read_data(name: &str) -> Decision {
    open_close(name, OFlag::O_RDONLY)
}

pub fn read_metadata(name: &str) -> Decision {
    let (decision, fd, created) = open_or_create(name, OFlag::O_RDONLY);
    let Some(fd) = fd else {
        return decision;
    };

    let file = std::fs::File::from(fd);
    let decision = match file.metadata() {
        Ok(_) => Decision::Allow,
        Err(_) => Decision::Deny,
    };
    drop(file);
    if created {
        let _ = shm_unlink(name);
    }
    decision
}
