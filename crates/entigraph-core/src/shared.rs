//! Shared access to a unit of work

use crate::uow::UnitOfWork;
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable handle serializing access to one [`UnitOfWork`]
///
/// A unit of work is single-owner; this wrapper is for callers that hand it
/// across threads. Every call holds the lock for the closure's duration.
#[derive(Debug, Clone)]
pub struct SharedUnitOfWork {
    inner: Arc<Mutex<UnitOfWork>>,
}

impl SharedUnitOfWork {
    /// Wrap a unit of work
    #[must_use]
    pub fn new(uow: UnitOfWork) -> Self {
        Self {
            inner: Arc::new(Mutex::new(uow)),
        }
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut UnitOfWork) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Take the unit of work back if this is the last handle
    ///
    /// # Errors
    /// Returns the handle unchanged while other clones are alive.
    pub fn try_into_inner(self) -> Result<UnitOfWork, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl From<UnitOfWork> for SharedUnitOfWork {
    fn from(uow: UnitOfWork) -> Self {
        Self::new(uow)
    }
}
