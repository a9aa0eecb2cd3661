//! The tracker's view of the instrumented process.

use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::{AtomicBool, Ordering};

use env_dump_fd::{format_record, Environment, EventKind};
use libc::c_int;
use tracing::trace;

use crate::device;
use crate::guard::ReentrancyGuard;
use crate::sink::LogSink;

pub struct ProcessEnv {
    sink: LogSink,
    ignored: AtomicBool,
}

impl ProcessEnv {
    pub fn new(sink: LogSink, ignored: bool) -> Self {
        ProcessEnv {
            sink,
            ignored: AtomicBool::new(ignored),
        }
    }

    /// Globally pause or resume tracking, e.g. around the tool's own I/O.
    pub fn set_ignored(&self, ignored: bool) {
        self.ignored.store(ignored, Ordering::Release);
    }
}

/// Path behind `fd` as exposed by `/proc/self/fd`.  Pipes, sockets and
/// anonymous inodes come back in their `type:[inode]` form.
pub fn fd_path(fd: c_int) -> Option<Vec<u8>> {
    if fd < 0 {
        return None;
    }
    std::fs::read_link(format!("/proc/self/fd/{fd}"))
        .ok()
        .map(|target| target.as_os_str().as_bytes().to_vec())
}

impl Environment for ProcessEnv {
    fn is_suppressed(&self) -> bool {
        self.ignored.load(Ordering::Acquire)
    }

    fn resolve_path(&self, fd: c_int) -> Option<Vec<u8>> {
        fd_path(fd)
    }

    fn emit(&self, kind: EventKind, path: &[u8]) {
        let _guard = ReentrancyGuard::enter();
        if let Err(err) = self.sink.write_record(&format_record(kind, path)) {
            trace!(%err, "dropping log record");
        }
    }

    fn dump_device_metadata(&self, path: &[u8], fd: c_int) {
        device::dump(path, fd);
    }
}
