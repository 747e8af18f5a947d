//! Retain/release discipline for pooled resources.

use std::fmt;
use std::ops::Deref;

use tracing::warn;

/// A pooled resource whose reuse is governed by a reference count.
///
/// `retain` increments the count and returns an alias of the same logical
/// resource; `release` decrements it. The pool may hand the resource out again
/// only once the count reaches zero.
pub trait ReferenceCounted: Sized {
    /// Increment the count and return an alias.
    fn retain(&self) -> Self;

    /// Decrement the count.
    fn release(&self);

    /// Current count.
    fn ref_count(&self) -> usize;
}

/// An owned, retained alias of a [`ReferenceCounted`] resource.
///
/// The alias must be given back through [`Lease::release`] exactly once.
/// Dropping an unreleased lease releases it and, in debug builds, fails an
/// assertion so that leaks show up in tests.
pub struct Lease<T: ReferenceCounted> {
    resource: Option<T>,
    label: &'static str,
}

impl<T: ReferenceCounted> Lease<T> {
    /// Retain `resource` and hold the resulting alias.
    pub fn acquire(resource: &T, label: &'static str) -> Self {
        Self {
            resource: Some(resource.retain()),
            label,
        }
    }

    /// Give the alias back to its owner.
    pub fn release(mut self) {
        if let Some(resource) = self.resource.take() {
            resource.release();
        }
    }

    /// What this lease holds, for diagnostics.
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl<T: ReferenceCounted> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.resource {
            Some(resource) => resource,
            // `resource` is only taken by `release(self)` and `drop`, both of
            // which consume the lease.
            None => unreachable!("lease used after release"),
        }
    }
}

impl<T: ReferenceCounted> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("label", &self.label)
            .field("ref_count", &self.resource.as_ref().map(T::ref_count))
            .finish()
    }
}

impl<T: ReferenceCounted> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            warn!("{} lease dropped without release", self.label);
            resource.release();
            debug_assert!(
                std::thread::panicking(),
                "{} lease dropped without release",
                self.label
            );
        }
    }
}
