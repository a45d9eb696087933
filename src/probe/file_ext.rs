//! Probe for `file-issue-extension`: actually issue a sandbox extension for
//! the recorded target.

use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use nix::libc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::oracle::Decision;

extern "C" {
    fn sandbox_extension_issue_file(
        extension_class: *const c_char,
        path: *const c_char,
        reserved: c_int,
        flags: c_int,
    ) -> *mut c_char;
}

const APP_SANDBOX_READ: &str = "com.apple.app-sandbox.read";
const APP_SANDBOX_READ_WRITE: &str = "com.apple.app-sandbox.read-write";

/// Log arguments look like
/// `target: /path/to/some/file class: com.apple.app-sandbox.read-write`.
/// The target may contain spaces; the class never does.
static TARGET_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^target: (?P<target>.*?) class: (?P<class>\S+)$").unwrap());

pub fn issue_extension(argument: &str) -> Decision {
    let Some(captures) = TARGET_CLASS.captures(argument) else {
        log::debug!("file-issue-extension argument did not parse: {argument}");
        return Decision::Error;
    };
    let target = &captures["target"];

    let class = match &captures["class"] {
        c if c == APP_SANDBOX_READ => APP_SANDBOX_READ,
        c if c == APP_SANDBOX_READ_WRITE => APP_SANDBOX_READ_WRITE,
        other => {
            log::debug!("unrecognised extension class: {other}");
            return Decision::Error;
        }
    };

    let (Ok(class_c), Ok(target_c)) = (CString::new(class), CString::new(target)) else {
        return Decision::Error;
    };

    let token =
        unsafe { sandbox_extension_issue_file(class_c.as_ptr(), target_c.as_ptr(), 0, 0) };
    if token.is_null() {
        Decision::Deny
    } else {
        unsafe { libc::free(token.cast()) };
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_grammar() {
        let captures = TARGET_CLASS
            .captures("target: /Users/me/My Documents/x.txt class: com.apple.app-sandbox.read")
            .unwrap();
        assert_eq!(&captures["target"], "/Users/me/My Documents/x.txt");
        assert_eq!(&captures["class"], "com.apple.app-sandbox.read");

        assert!(TARGET_CLASS.captures("class: only").is_none());
    }
}
