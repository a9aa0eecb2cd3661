//! Collaborators the tracker relies on but does not own.

use libc::c_int;

/// Kind of record written to the log sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Ioctl,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ioctl => "IOCTL",
        }
    }
}

/// Format one log record: `KIND,path\n`.
pub fn format_record(kind: EventKind, path: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(kind.as_str().len() + path.len() + 2);
    line.extend_from_slice(kind.as_str().as_bytes());
    line.push(b',');
    line.extend_from_slice(path);
    line.push(b'\n');
    line
}

/// The surrounding tool, as seen from the intercepts.
///
/// Every method may be called concurrently from any application thread and
/// is always called with the tracker lock released.
pub trait Environment {
    /// True while tracking is globally disabled (e.g. during the tool's own
    /// internal work).
    fn is_suppressed(&self) -> bool;

    /// Filesystem path currently backing `fd`, if it can be determined.
    fn resolve_path(&self, fd: c_int) -> Option<Vec<u8>>;

    /// Append one record to the log sink.  Failures are the sink's problem.
    fn emit(&self, kind: EventKind, path: &[u8]);

    /// Device-specific introspection for a descriptor seen for the first time.
    fn dump_device_metadata(&self, path: &[u8], fd: c_int);
}

impl<E: Environment + ?Sized> Environment for &E {
    fn is_suppressed(&self) -> bool {
        (**self).is_suppressed()
    }

    fn resolve_path(&self, fd: c_int) -> Option<Vec<u8>> {
        (**self).resolve_path(fd)
    }

    fn emit(&self, kind: EventKind, path: &[u8]) {
        (**self).emit(kind, path)
    }

    fn dump_device_metadata(&self, path: &[u8], fd: c_int) {
        (**self).dump_device_metadata(path, fd)
    }
}
