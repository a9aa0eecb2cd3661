//! Process-wide destination for log records.
//!
//! The sink holds a raw descriptor for the whole process lifetime.  It is
//! never closed by us, so there is no close to intercept at exit and no
//! open/close overhead per record.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::IntoRawFd;

use libc::{c_int, c_void};
use tracing::debug;

use crate::config::Output;

#[derive(Debug)]
pub struct LogSink {
    fd: Option<c_int>,
}

impl LogSink {
    /// Open the configured output.  A file that cannot be opened leaves the
    /// sink disabled rather than failing the host process.
    pub fn open(output: &Output) -> Self {
        let fd = match output {
            Output::Stderr => Some(libc::STDERR_FILENO),
            Output::Fd(fd) => Some(*fd),
            Output::File(path) => match OpenOptions::new().append(true).create(true).open(path) {
                Ok(file) => Some(file.into_raw_fd()),
                Err(err) => {
                    debug!(path = %path.display(), %err, "cannot open log file, records dropped");
                    None
                }
            },
        };
        LogSink { fd }
    }

    #[cfg(test)]
    fn disabled() -> Self {
        LogSink { fd: None }
    }

    #[cfg(test)]
    fn fd(&self) -> Option<c_int> {
        self.fd
    }

    /// Write one whole record with as few `write` calls as the kernel allows.
    pub fn write_record(&self, mut buf: &[u8]) -> io::Result<()> {
        let Some(fd) = self.fd else {
            return Ok(());
        };
        while !buf.is_empty() {
            let n = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            buf = &buf[n as usize..];
        }
        Ok(())
    }
}
