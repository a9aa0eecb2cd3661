//! Per-thread marker for the library's own I/O.
//!
//! While this library sets itself up or writes a record, any `ioctl()`/
//! `close()` it triggers goes straight to libc.  Close callbacks and the
//! device hook are not covered: descriptors they touch are tracked like any
//! other.

use std::cell::Cell;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

pub struct ReentrancyGuard;

impl ReentrancyGuard {
    /// `None` if this thread is already doing internal I/O.
    pub fn enter() -> Option<Self> {
        IN_HOOK.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(ReentrancyGuard)
            }
        })
    }

    /// True while some frame on this thread holds a guard.
    pub fn active() -> bool {
        IN_HOOK.with(Cell::get)
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        IN_HOOK.with(|flag| flag.set(false));
    }
}
