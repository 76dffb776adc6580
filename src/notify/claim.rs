use std::ops::{Deref, DerefMut};

use tokio::sync::MutexGuard;

/// Exclusive, short-lived access to a connection's protocol state.
///
/// Dropping a claim releases it, but code that is about to block calls
/// [`Claim::release`] explicitly so the release point is visible.
#[must_use = "a claim blocks every other caller on the connection until released"]
pub struct Claim<'a, C> {
    guard: MutexGuard<'a, C>,
}

impl<'a, C> Claim<'a, C> {
    pub(crate) fn new(guard: MutexGuard<'a, C>) -> Self {
        tracing::trace!("claim acquired");
        Self { guard }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl<C> Drop for Claim<'_, C> {
    fn drop(&mut self) {
        tracing::trace!("claim released");
    }
}

impl<C> Deref for Claim<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.guard
    }
}

impl<C> DerefMut for Claim<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.guard
    }
}
