//! LD_PRELOAD library for env_dump descriptor tracking.
//!
//! Intercepts the libc `ioctl` and `close` wrappers:
//!
//! - The first `ioctl` on a descriptor resolves its path through
//!   `/proc/self/fd`, writes an `IOCTL,<path>` record to the log sink and
//!   hands the path to the device hook (see [`device`]).
//! - `close` first runs the callbacks other parts of the tool registered for
//!   that descriptor (`env_dump_close_callback`), then forgets it so that a
//!   later descriptor with the same number counts as a first use again.
//!   A `close` issued from inside a callback or the device hook is handled
//!   the same way.
//!
//! Both always forward to the real libc function, found with
//! `dlsym(RTLD_NEXT, ...)`, and return its result untouched.
//!
//! ## Configuration
//!
//! Records go to `ENV_DUMP_FD` when set (an inherited pipe or file), else to
//! the file named by `ENV_DUMP_FILE`, else to stderr.  `ENV_DUMP_TRACE` turns
//! on the library's own diagnostics using `tracing` filter syntax, and
//! `ENV_DUMP_IGNORE=1` starts with tracking paused.  See [`config`].
//!
//! ## Known limitation
//!
//! The destructor flushes every pending close callback.  Registrations made
//! after that point are refused and never fire.

use std::io::Write;
use std::sync::LazyLock;

use env_dump_fd::{FireTarget, Tracker, UserData};
use libc::{c_int, c_void};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_os = "linux"))]
compile_error!("env_dump descriptor tracking relies on /proc/self/fd and LD_PRELOAD (Linux only)");

pub mod config;
pub mod device;
mod guard;
pub mod process;
pub mod sink;
mod symbols;

use config::Config;
use guard::ReentrancyGuard;
use process::ProcessEnv;
use sink::LogSink;

pub use env_dump_fd::CloseCallback;
pub use device::DeviceHook;

// ---------------------------------------------------------------------------
// Process-wide state
// ---------------------------------------------------------------------------

/// Everything the interposers share: the tracker and the process it observes.
struct Preload {
    tracker: Tracker,
    env: ProcessEnv,
}

impl Preload {
    fn from_env() -> Self {
        let config = Config::from_env().unwrap_or_else(|err| {
            let _ = writeln!(std::io::stderr(), "env_dump: {err}, using defaults");
            Config::default()
        });
        if let Some(directives) = &config.trace {
            init_tracing(directives);
        }
        debug!(?config, "env_dump fd tracking loaded");

        Preload {
            tracker: Tracker::new(),
            env: ProcessEnv::new(LogSink::open(&config.output), config.ignore),
        }
    }
}

static PRELOAD: LazyLock<Preload> = LazyLock::new(|| {
    // Calls made while loading the config or opening the sink must not try
    // to initialise PRELOAD again.
    let _guard = ReentrancyGuard::enter();
    Preload::from_env()
});

fn init_tracing(directives: &str) {
    // No ANSI: colour detection would query the terminal with ioctl().
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

// ---------------------------------------------------------------------------
// C API for the rest of the tool
// ---------------------------------------------------------------------------

fn set_errno(val: c_int) {
    unsafe { *libc::__errno_location() = val };
}

/// Run `cb(fd, user)` once, right before `fd` is closed (or at process exit
/// if it never is).
///
/// Returns 0, or -1 with errno set to `EINVAL` (null callback), `ENOMEM` or
/// `ESHUTDOWN`.
#[no_mangle]
pub extern "C" fn env_dump_close_callback(fd: c_int, cb: Option<CloseCallback>, user: *mut c_void) -> c_int {
    let Some(cb) = cb else {
        set_errno(libc::EINVAL);
        return -1;
    };
    match PRELOAD.tracker.register(fd, cb, UserData(user)) {
        Ok(()) => 0,
        Err(err) => {
            warn!(fd, %err, "close callback not registered");
            set_errno(err.errno());
            -1
        }
    }
}

/// Fire the close callbacks of `fd` now, or of every descriptor if `fd` is
/// negative.  Returns how many ran.
#[no_mangle]
pub extern "C" fn env_dump_fd_flush(fd: c_int) -> c_int {
    let fired = PRELOAD.tracker.fire(FireTarget::from_raw(fd));
    c_int::try_from(fired).unwrap_or(c_int::MAX)
}

/// Pause (`true`) or resume (`false`) all tracking.
#[no_mangle]
pub extern "C" fn env_dump_set_ignored(ignored: bool) {
    PRELOAD.env.set_ignored(ignored);
}

/// Install the device metadata hook; a null hook removes it.
#[no_mangle]
pub extern "C" fn env_dump_set_device_hook(hook: Option<DeviceHook>) {
    device::set_hook(hook);
}

#[no_mangle]
pub extern "C" fn env_dump_fd_init() {
    PRELOAD.tracker.init();
}

/// Final flush of every pending close callback.
#[no_mangle]
pub extern "C" fn env_dump_fd_fini() {
    PRELOAD.tracker.shutdown();
}

// ===========================================================================
// Intercepted libc functions
// ===========================================================================
//
// Left out of unit-test builds so the test harness keeps the plain libc
// `ioctl`/`close`.

#[cfg(not(test))]
mod interpose {
    use super::*;
    use crate::symbols::real;
    use libc::c_ulong;

    /// glibc declares the request as `unsigned long`, musl as `int`.
    #[cfg(not(target_env = "musl"))]
    type Request = c_ulong;
    #[cfg(target_env = "musl")]
    type Request = c_int;

    /// Intercept `ioctl()`: log the first use of each descriptor.
    ///
    /// Declared with a single pointer-sized argument in place of the C
    /// varargs: every request passes at most one, in the same register.
    #[no_mangle]
    pub unsafe extern "C" fn ioctl(fd: c_int, request: Request, arg: *mut c_void) -> c_int {
        type IoctlFn = unsafe extern "C" fn(c_int, Request, *mut c_void) -> c_int;
        let real = real!(ioctl, IoctlFn);

        if ReentrancyGuard::active() {
            return real(fd, request, arg);
        }
        let state = &*PRELOAD;
        state.tracker.ioctl(&state.env, fd, || real(fd, request, arg))
    }

    /// Intercept `close()`: run close callbacks and forget the descriptor.
    #[no_mangle]
    pub unsafe extern "C" fn close(fd: c_int) -> c_int {
        type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
        let real = real!(close, CloseFn);

        if ReentrancyGuard::active() {
            return real(fd);
        }
        let state = &*PRELOAD;
        state.tracker.close(&state.env, fd, || real(fd))
    }

    #[ctor::ctor]
    fn load() {
        env_dump_fd_init();
    }

    #[ctor::dtor]
    fn unload() {
        env_dump_fd_fini();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use env_dump_fd::Environment;
    use libc::c_char;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIRED: AtomicUsize = AtomicUsize::new(0);
    static DUMPED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count(_fd: c_int, _user: *mut c_void) {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn dumped(_path: *const c_char, fd: c_int) {
        DUMPED.store(fd as usize, Ordering::SeqCst);
    }

    fn errno() -> c_int {
        unsafe { *libc::__errno_location() }
    }

    // One test: the exports share PRELOAD and the device hook.
    #[test]
    #[serial(device_hook)]
    fn c_api_round_trip() {
        let null = std::ptr::null_mut();

        assert_eq!(env_dump_close_callback(40, None, null), -1);
        assert_eq!(errno(), libc::EINVAL);

        assert_eq!(env_dump_close_callback(40, Some(count), null), 0);
        assert_eq!(env_dump_close_callback(40, Some(count), null), 0);
        assert_eq!(env_dump_close_callback(41, Some(count), null), 0);
        assert_eq!(env_dump_fd_flush(40), 2);
        assert_eq!(env_dump_fd_flush(40), 0);
        assert_eq!(env_dump_fd_flush(-1), 1);
        assert_eq!(FIRED.load(Ordering::SeqCst), 3);

        env_dump_set_ignored(true);
        assert!(PRELOAD.env.is_suppressed());
        env_dump_set_ignored(false);
        assert!(!PRELOAD.env.is_suppressed());

        env_dump_set_device_hook(Some(dumped));
        device::dump(b"/dev/dri/card0", 42);
        env_dump_set_device_hook(None);
        device::dump(b"/dev/dri/card0", 43);
        assert_eq!(DUMPED.load(Ordering::SeqCst), 42);

        env_dump_fd_fini();
        assert_eq!(env_dump_close_callback(44, Some(count), null), -1);
        assert_eq!(errno(), libc::ESHUTDOWN);
        env_dump_fd_init();
        assert_eq!(env_dump_close_callback(44, Some(count), null), 0);
        assert_eq!(env_dump_fd_flush(44), 1);
    }
}
