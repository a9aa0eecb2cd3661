//! Descriptor first-use tracking and close-callback dispatch.
//!
//! This crate holds the state behind the env_dump `ioctl`/`close`
//! interposers, independent of how they are loaded into a process:
//!
//! - [`SeenBitmap`]: one bit per descriptor so that the first device-control
//!   call on each descriptor is logged exactly once.
//! - [`CallbackRegistry`]: callbacks other parts of the tool attach to a
//!   descriptor, fired once when it is closed (or all at shutdown).
//! - [`Tracker`]: both structures behind a single lock, plus the logic the
//!   intercepts run before delegating to the real libc call.
//!
//! Everything the tracker needs from the outside world (path resolution, the
//! log sink, device dumps, the global "ignore" switch) comes in through the
//! [`Environment`] trait.

pub mod bitmap;
pub mod environment;
pub mod error;
pub mod registry;
pub mod tracker;

pub use bitmap::{SeenBitmap, DEFAULT_CAPACITY};
pub use environment::{format_record, Environment, EventKind};
pub use error::{Error, Result};
pub use registry::{CallbackRegistry, CloseCallback, FireTarget, Registration, UserData};
pub use tracker::Tracker;
