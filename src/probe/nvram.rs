//! Probe for `nvram-get`: fetch the NVRAM options dictionary and look the
//! variable up.
//!
//! Creating the full properties dictionary queries every NVRAM variable and
//! ordinarily produces a burst of deny records in the system log; with the
//! no-report semantics of a recheck worker that is acceptable, and it lets
//! us decide whether this particular variable came through.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::oracle::Decision;

use super::iokit::{kIOMasterPortDefault, io_object_t, kern_return_t, IOObjectRelease, KERN_SUCCESS};

const K_CF_STRING_ENCODING_UTF8: u32 = 0x0800_0100;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    fn IORegistryEntryFromPath(main_port: u32, path: *const c_char) -> io_object_t;
    fn IORegistryEntryCreateCFProperties(
        entry: io_object_t,
        properties: *mut *mut c_void,
        allocator: *const c_void,
        options: u32,
    ) -> kern_return_t;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFStringCreateWithCString(
        alloc: *const c_void,
        c_str: *const c_char,
        encoding: u32,
    ) -> *const c_void;
    fn CFDictionaryGetValue(dict: *const c_void, key: *const c_void) -> *const c_void;
    fn CFRelease(cf: *const c_void);
}

pub fn get(variable: &str) -> Decision {
    let Ok(variable_c) = CString::new(variable) else {
        return Decision::Error;
    };
    let Ok(path) = CString::new("IODeviceTree:/options") else {
        return Decision::Error;
    };

    unsafe {
        let root = IORegistryEntryFromPath(kIOMasterPortDefault, path.as_ptr());
        if root == 0 {
            return Decision::Deny;
        }

        let mut properties: *mut c_void = ptr::null_mut();
        let kr = IORegistryEntryCreateCFProperties(root, &mut properties, ptr::null(), 0);
        IOObjectRelease(root);
        if kr != KERN_SUCCESS || properties.is_null() {
            return Decision::Deny;
        }

        let key = CFStringCreateWithCString(
            ptr::null(),
            variable_c.as_ptr(),
            K_CF_STRING_ENCODING_UTF8,
        );
        if key.is_null() {
            CFRelease(properties);
            return Decision::Error;
        }

        let present = !CFDictionaryGetValue(properties, key).is_null();
        CFRelease(key);
        CFRelease(properties);

        if present {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}
