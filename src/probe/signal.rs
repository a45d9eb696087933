//! Probe for `signal`.
//!
//! The only sanctioned use of `signal` in practice is a parent signalling
//! its own same-sandbox children, and the logs record nothing that would
//! distinguish other targets, so the probe replicates exactly that: fork a
//! sleeper child and try to kill it.

use std::thread::sleep;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};

use crate::oracle::{kernel, Decision, FilterCategory};

pub fn signal_child(_argument: &str) -> Decision {
    // Forking while process-fork is denied would get this worker killed
    // outright, which the parent would misread as a protocol failure.
    match kernel::check("process-fork", FilterCategory::None, None) {
        Some(true) => {}
        Some(false) | None => return Decision::Error,
    }

    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            sleep(Duration::from_secs(5));
            std::process::exit(0);
        }
        Ok(ForkResult::Parent { child }) => {
            // SIGKILL also reaps the sleeper while we are at it.
            let allowed = kill(child, Signal::SIGKILL).is_ok();
            let _ = waitpid(child, None);
            if allowed {
                Decision::Allow
            } else {
                Decision::Deny
            }
        }
        Err(_) => Decision::Error,
    }
}
