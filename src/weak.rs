use std::{
    fmt,
    hash::{Hash, Hasher},
    mem,
    ptr::NonNull,
};

use crate::shared::{Parts, Shared};

/// A non-owning handle to an object managed by [`Shared`].
///
/// A weak handle keeps the control block alive but not the object. It cannot be dereferenced;
/// [`lock`][Weak::lock] it into a `Shared` first, which fails once every strong handle is gone.
pub struct Weak<T>
where
    T: ?Sized + 'static,
{
    parts: Option<Parts<T>>,
}

impl<T: ?Sized> Weak<T> {
    /// Creates a weak handle that observes nothing. It is always [`expired`][Weak::expired].
    pub const fn new() -> Self {
        Weak { parts: None }
    }

    /// # Safety
    ///
    /// The caller hands over one weak reference to `parts.block`.
    pub(crate) unsafe fn from_parts(parts: Parts<T>) -> Self {
        Weak { parts: Some(parts) }
    }

    /// Returns `true` once the observed object has been destroyed.
    ///
    /// An empty handle counts as expired.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Gets the number of strong handles keeping the object alive.
    pub fn use_count(&self) -> usize {
        self.parts.map_or(0, |parts| parts.block.shared_count())
    }

    /// Gets the number of weak handles observing the object, including `self`.
    pub fn weak_count(&self) -> usize {
        self.parts.map_or(0, |parts| parts.block.weak_count())
    }

    /// Creates a strong handle to the object. Returns `None` if the object has already been
    /// destroyed or the handle is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Shared;
    /// let s = Shared::new(5);
    /// let w = s.downgrade();
    ///
    /// assert!(w.upgrade().as_deref() == Some(&5));
    ///
    /// drop(s);
    /// assert!(w.upgrade().is_none());
    /// ```
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let parts = self.parts?;

        parts
            .block
            .try_inc_shared()
            .then(|| unsafe { Shared::from_parts(parts) })
    }

    /// Like [`upgrade`][Weak::upgrade], but returns an empty `Shared` on failure.
    pub fn lock(&self) -> Shared<T> {
        self.upgrade().unwrap_or_default()
    }

    /// Gets the object pointer this handle was created with. The pointee may already be
    /// destroyed.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.parts.map(|parts| parts.ptr)
    }

    /// Moves the observation out of `self`, leaving it empty. No count changes.
    pub fn take(&mut self) -> Self {
        Weak {
            parts: self.parts.take(),
        }
    }

    /// Stops observing the object, leaving the handle empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Exchanges what two handles observe. No count changes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.parts, &mut other.parts);
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        if let Some(parts) = self.parts.take() {
            unsafe { parts.block.dec_weak() };
        }
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(parts) = self.parts {
            parts.block.inc_weak();
        }

        Weak { parts: self.parts }
    }

    fn clone_from(&mut self, source: &Self) {
        if Parts::same(self.parts, source.parts) {
            return;
        }

        let mut tmp = source.clone();
        self.swap(&mut tmp);
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    fn from(value: &Shared<T>) -> Self {
        value.downgrade()
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Weak<U>> for Weak<T> {
    fn eq(&self, other: &Weak<U>) -> bool {
        Parts::addr(self.parts) == Parts::addr(other.parts)
    }
}

impl<T: ?Sized> Eq for Weak<T> {}

impl<T: ?Sized> Hash for Weak<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Parts::addr(self.parts).hash(state)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}
