//! Close-callback registrations with slot reuse.

use libc::{c_int, c_void};

use crate::error::{Error, Result};

/// Callback invoked with the registered descriptor and user pointer.
pub type CloseCallback = unsafe extern "C" fn(fd: c_int, user: *mut c_void);

/// Opaque pointer-sized value handed back to the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserData(pub *mut c_void);

// SAFETY: the registry never dereferences the pointer; it is only handed back
// to the callback that was registered together with it.
unsafe impl Send for UserData {}

impl UserData {
    pub fn null() -> Self {
        UserData(std::ptr::null_mut())
    }
}

/// Which registrations a firing pass should consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireTarget {
    Fd(c_int),
    /// Wildcard flush: every active registration.
    All,
}

impl FireTarget {
    /// Map the C convention (negative fd means "all") onto a target.
    pub fn from_raw(fd: c_int) -> Self {
        if fd < 0 {
            FireTarget::All
        } else {
            FireTarget::Fd(fd)
        }
    }

    fn matches(self, fd: c_int) -> bool {
        match self {
            FireTarget::Fd(target) => target == fd,
            FireTarget::All => true,
        }
    }
}

/// A single active registration.
#[derive(Clone, Copy, Debug)]
pub struct Registration {
    pub fd: c_int,
    pub callback: CloseCallback,
    pub user: UserData,
}

impl Registration {
    /// Run the callback.
    ///
    /// # Safety
    ///
    /// The callback must be sound to call with the registered fd and user
    /// pointer, which is whatever contract the registering code established.
    pub unsafe fn invoke(self) {
        (self.callback)(self.fd, self.user.0)
    }
}

/// Growable list of registrations.  `None` slots are inactive and get reused
/// (first fit) before the list grows; slots are never removed.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    slots: Vec<Option<Registration>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Store a registration and return the slot it landed in.
    pub fn register(&mut self, fd: c_int, callback: CloseCallback, user: UserData) -> Result<usize> {
        let entry = Registration { fd, callback, user };

        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            self.slots[idx] = Some(entry);
            return Ok(idx);
        }

        self.slots
            .try_reserve(1)
            .map_err(|_| Error::RegistryAlloc { slots: self.slots.len() })?;
        self.slots.push(Some(entry));
        Ok(self.slots.len() - 1)
    }

    /// Find the first active registration in `from..end` matching `target`,
    /// deactivate it and hand it back together with its slot index.
    ///
    /// `end` is clamped to the current length.
    pub fn take_next(&mut self, from: usize, end: usize, target: FireTarget) -> Option<(usize, Registration)> {
        let end = end.min(self.slots.len());
        if from >= end {
            return None;
        }
        self.slots[from..end]
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_some_and(|r| target.matches(r.fd)))
            .and_then(|(offset, slot)| slot.take().map(|r| (from + offset, r)))
    }

    /// Total number of slots, active or not.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[cfg(test)]
    fn active_for(&self, fd: c_int) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|r| r.fd == fd)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    unsafe extern "C" fn noop(_fd: c_int, _user: *mut c_void) {}

    fn drain(registry: &mut CallbackRegistry, target: FireTarget) -> Vec<(usize, c_int)> {
        let end = registry.len();
        let mut cursor = 0;
        let mut taken = Vec::new();
        while let Some((idx, reg)) = registry.take_next(cursor, end, target) {
            taken.push((idx, reg.fd));
            cursor = idx + 1;
        }
        taken
    }

    #[test]
    fn register_appends_when_full() {
        let mut registry = CallbackRegistry::new();
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.register(3, noop, UserData::null()), Ok(0));
        assert_eq!(registry.register(4, noop, UserData::null()), Ok(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn inactive_slots_are_reused_first_fit() {
        let mut registry = CallbackRegistry::new();
        for fd in 0..4 {
            registry.register(fd, noop, UserData::null()).unwrap();
        }
        assert_eq!(drain(&mut registry, FireTarget::Fd(1)), vec![(1, 1)]);
        assert_eq!(drain(&mut registry, FireTarget::Fd(3)), vec![(3, 3)]);

        assert_eq!(registry.register(9, noop, UserData::null()), Ok(1));
        assert_eq!(registry.register(10, noop, UserData::null()), Ok(3));
        assert_eq!(registry.register(11, noop, UserData::null()), Ok(4));
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn take_next_only_matches_target() {
        let mut registry = CallbackRegistry::new();
        registry.register(3, noop, UserData::null()).unwrap();
        registry.register(5, noop, UserData::null()).unwrap();
        registry.register(3, noop, UserData::null()).unwrap();

        assert_eq!(drain(&mut registry, FireTarget::Fd(3)), vec![(0, 3), (2, 3)]);
        assert_eq!(registry.active_for(3), 0);
        assert_eq!(registry.active_for(5), 1);
        assert!(drain(&mut registry, FireTarget::Fd(3)).is_empty());
    }

    #[test]
    fn take_next_respects_end_bound() {
        let mut registry = CallbackRegistry::new();
        registry.register(1, noop, UserData::null()).unwrap();
        registry.register(1, noop, UserData::null()).unwrap();
        assert!(registry.take_next(0, 1, FireTarget::Fd(1)).is_some());
        assert!(registry.take_next(0, 1, FireTarget::Fd(1)).is_none());
        assert!(registry.take_next(5, 10, FireTarget::All).is_none());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn negative_fd_is_wildcard() {
        assert_eq!(FireTarget::from_raw(-1), FireTarget::All);
        assert_eq!(FireTarget::from_raw(0), FireTarget::Fd(0));
    }

    proptest! {
        #[test]
        fn prop_wildcard_drains_everything(fds in prop::collection::vec(0..64i32, 0..50)) {
            let mut registry = CallbackRegistry::new();
            for &fd in &fds {
                registry.register(fd, noop, UserData::null()).unwrap();
            }
            let taken = drain(&mut registry, FireTarget::All);
            prop_assert_eq!(taken.len(), fds.len());
            prop_assert_eq!(registry.active_count(), 0);
        }

        #[test]
        fn prop_growth_keeps_active_entries(ops in prop::collection::vec((0..8i32, any::<bool>()), 1..100)) {
            let mut registry = CallbackRegistry::new();
            let mut expected = [0usize; 8];
            for (fd, fire) in ops {
                if fire {
                    let taken = drain(&mut registry, FireTarget::Fd(fd));
                    prop_assert_eq!(taken.len(), expected[fd as usize]);
                    expected[fd as usize] = 0;
                } else {
                    registry.register(fd, noop, UserData::null()).unwrap();
                    expected[fd as usize] += 1;
                }
            }
            for fd in 0..8 {
                prop_assert_eq!(registry.active_for(fd), expected[fd as usize]);
            }
        }
    }
}
