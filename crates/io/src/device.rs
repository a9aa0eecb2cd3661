//! Device metadata dump hook.
//!
//! The part of the tool that knows how to introspect a device (DRM driver
//! name and version, for instance) installs a hook here; it is called once
//! for every descriptor whose first `ioctl` was logged.

use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_char, c_int};
use tracing::{debug, trace};

/// `hook(path, fd)`; `path` is NUL-terminated and only valid for the call.
pub type DeviceHook = unsafe extern "C" fn(path: *const c_char, fd: c_int);

static HOOK: AtomicUsize = AtomicUsize::new(0);

/// Install `hook`, or remove the current one with `None`.
pub fn set_hook(hook: Option<DeviceHook>) {
    HOOK.store(hook.map_or(0, |h| h as usize), Ordering::Release);
}

fn current_hook() -> Option<DeviceHook> {
    match HOOK.load(Ordering::Acquire) {
        0 => None,
        addr => Some(unsafe { std::mem::transmute::<usize, DeviceHook>(addr) }),
    }
}

/// Hand a newly seen device path to the installed hook, if any.
pub fn dump(path: &[u8], fd: c_int) {
    let Some(hook) = current_hook() else {
        trace!(fd, "no device hook installed");
        return;
    };
    let Ok(cpath) = CString::new(path) else {
        debug!(fd, "device path contains NUL, skipping dump");
        return;
    };
    unsafe { hook(cpath.as_ptr(), fd) };
}
