//! Lookup of the real libc implementations behind our interposers.
//!
//! The dynamic linker resolves symbols in LD_PRELOAD libraries first, so
//! defining `ioctl()`/`close()` directly interposes them.  We forward to the
//! next definition in link order via `dlsym(RTLD_NEXT, ...)`, caching the
//! address per call site.

use std::io::Write;

use tracing::error;

/// Resolve `$name` to a function pointer of type `$ty`, once per call site.
///
/// Evaluates to `Option<$ty>`; `None` if no later object defines the symbol.
macro_rules! resolve {
    ($name:ident, $ty:ty) => {{
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        static ADDR: AtomicUsize = AtomicUsize::new(0);
        static RESOLVED: AtomicBool = AtomicBool::new(false);
        if !RESOLVED.load(Ordering::Acquire) {
            let sym = unsafe {
                libc::dlsym(
                    libc::RTLD_NEXT,
                    concat!(stringify!($name), "\0").as_ptr() as *const libc::c_char,
                )
            };
            if !sym.is_null() {
                ADDR.store(sym as usize, Ordering::Release);
            }
            RESOLVED.store(true, Ordering::Release);
        }
        let addr = ADDR.load(Ordering::Acquire);
        if addr != 0 {
            Some(unsafe { std::mem::transmute::<usize, $ty>(addr) })
        } else {
            None
        }
    }};
}

/// Like [`resolve!`] but aborts the process when the symbol is missing:
/// without the real implementation the call cannot be honoured.
macro_rules! real {
    ($name:ident, $ty:ty) => {
        match $crate::symbols::resolve!($name, $ty) {
            Some(f) => f,
            None => $crate::symbols::missing(stringify!($name)),
        }
    };
}

pub(crate) use {real, resolve};

#[cold]
pub(crate) fn missing(name: &str) -> ! {
    error!(symbol = name, "real implementation not found, aborting");
    let _ = writeln!(
        std::io::stderr(),
        "env_dump: cannot resolve the real `{name}`, aborting"
    );
    std::process::abort()
}
