//! The shared tracking context driven by the `ioctl` and `close` intercepts.

use std::sync::{Mutex, MutexGuard, PoisonError};

use libc::c_int;
use tracing::{debug, trace, warn};

use crate::bitmap::SeenBitmap;
use crate::environment::{EventKind, Environment};
use crate::error::{Error, Result};
use crate::registry::{CallbackRegistry, CloseCallback, FireTarget, UserData};

#[derive(Debug, Default)]
struct State {
    seen: SeenBitmap,
    registry: CallbackRegistry,
    shut_down: bool,
}

/// Seen-bitmap and close-callback registry behind one lock.
///
/// The lock is only held while reading or writing those two structures.
/// Path resolution, logging, device dumps and user callbacks all run with it
/// released, so a callback may freely call back into the tracker.
#[derive(Debug, Default)]
pub struct Tracker {
    state: Mutex<State>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_capacity(crate::bitmap::DEFAULT_CAPACITY)
    }

    /// Tracker whose bitmap covers descriptors `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Tracker {
            state: Mutex::new(State {
                seen: SeenBitmap::with_capacity(capacity),
                registry: CallbackRegistry::new(),
                shut_down: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every update is a single step and callbacks run unlocked, so a
        // poisoned guard still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn init(&self) {
        self.lock().shut_down = false;
        debug!("fd tracking initialised");
    }

    /// Final wildcard flush.  Registrations attempted afterwards are refused.
    pub fn shutdown(&self) {
        self.lock().shut_down = true;
        let fired = self.fire(FireTarget::All);
        debug!(fired, "fd tracking shut down");
    }

    // -----------------------------------------------------------------------
    // Seen-bitmap access
    // -----------------------------------------------------------------------

    pub fn is_seen(&self, fd: c_int) -> bool {
        self.lock().seen.is_seen(fd)
    }

    pub fn mark(&self, fd: c_int, value: bool) {
        self.lock().seen.mark(fd, value);
    }

    /// Atomically check and set the flag for `fd`.  Returns true only for the
    /// caller that flipped it from unseen to seen.
    fn claim_first_use(&self, fd: c_int) -> bool {
        let mut state = self.lock();
        if state.seen.is_seen(fd) {
            return false;
        }
        state.seen.mark(fd, true);
        true
    }

    #[cfg(test)]
    fn seen_count(&self) -> usize {
        self.lock().seen.count_seen()
    }

    // -----------------------------------------------------------------------
    // Close callbacks
    // -----------------------------------------------------------------------

    /// Ask for `callback(fd, user)` to run once when `fd` is closed, or at
    /// shutdown if it never is.
    pub fn register(&self, fd: c_int, callback: CloseCallback, user: UserData) -> Result<()> {
        let mut state = self.lock();
        if state.shut_down {
            drop(state);
            warn!(fd, "close callback registered after shutdown, ignoring");
            return Err(Error::ShutDown);
        }
        let slot = state.registry.register(fd, callback, user)?;
        drop(state);
        trace!(fd, slot, "close callback registered");
        Ok(())
    }

    /// Run every active registration matching `target`, each at most once.
    ///
    /// Each entry is deactivated under the lock, then invoked with the lock
    /// released.  The scan covers the slots that existed when the pass
    /// started and its cursor only moves forward, so registrations made by
    /// the callbacks themselves wait for a later pass.  Returns how many
    /// callbacks ran.
    pub fn fire(&self, target: FireTarget) -> usize {
        let end = self.lock().registry.len();

        let mut cursor = 0;
        let mut fired = 0;
        loop {
            let next = self.lock().registry.take_next(cursor, end, target);
            let Some((slot, registration)) = next else {
                break;
            };
            cursor = slot + 1;
            fired += 1;
            trace!(fd = registration.fd, slot, "firing close callback");
            // SAFETY: the registering code vouched for this callback/user pair.
            unsafe { registration.invoke() };
        }
        fired
    }

    pub fn active_callbacks(&self) -> usize {
        self.lock().registry.active_count()
    }

    // -----------------------------------------------------------------------
    // Intercepts
    // -----------------------------------------------------------------------

    /// Observe a device-control call on `fd`, then run the real call.
    ///
    /// The first call on an untracked descriptor logs its path and triggers
    /// the device dump.  `real` always runs and its result is returned as is.
    pub fn ioctl<E, R, F>(&self, env: &E, fd: c_int, real: F) -> R
    where
        E: Environment + ?Sized,
        F: FnOnce() -> R,
    {
        if !env.is_suppressed() {
            self.observe_first_use(env, fd);
        }
        real()
    }

    fn observe_first_use<E: Environment + ?Sized>(&self, env: &E, fd: c_int) {
        if !self.claim_first_use(fd) {
            return;
        }

        // The bit is claimed before the unlocked lookup below.  If another
        // thread closes `fd` and the number is reused in between, the new
        // file is logged under this claim and its own first use is not.

        // Unresolvable descriptors stay marked so we do not retry every call.
        let path = match env.resolve_path(fd) {
            Some(path) if path.first() == Some(&b'/') => path,
            other => {
                trace!(fd, resolved = other.is_some(), "no absolute path for fd");
                return;
            }
        };

        env.emit(EventKind::Ioctl, &path);
        env.dump_device_metadata(&path, fd);
    }

    /// Notify close callbacks for `fd`, forget it, then run the real close.
    pub fn close<E, R, F>(&self, env: &E, fd: c_int, real: F) -> R
    where
        E: Environment + ?Sized,
        F: FnOnce() -> R,
    {
        if !env.is_suppressed() {
            self.fire(FireTarget::Fd(fd));
            self.mark(fd, false);
        }
        real()
    }
}
