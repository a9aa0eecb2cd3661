//! Error type for close-callback registration.

use thiserror::Error;

/// Errors surfaced to callers of the registration API.
///
/// Intercepted calls never see these; they only reach code that asked to be
/// notified of a close.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot grow close-callback registry beyond {slots} slots")]
    RegistryAlloc { slots: usize },

    #[error("close-callback registry already flushed at shutdown")]
    ShutDown,
}

impl Error {
    /// errno value reported through the C registration entry point.
    pub fn errno(&self) -> libc::c_int {
        match self {
            Error::RegistryAlloc { .. } => libc::ENOMEM,
            Error::ShutDown => libc::ESHUTDOWN,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
