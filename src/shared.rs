use std::{
    alloc::handle_alloc_error,
    fmt,
    hash::{Hash, Hasher},
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    block::{BlockRef, RegularBlock},
    AllocError, Allocator, DefaultDelete, Deleter, Global, Weak,
};

/// The control block a handle points into, together with the object it observes.
///
/// The object pointer is kept separately from the block so that a handle can point at any part of
/// the object (or anything else the object keeps alive) without losing track of its owner.
pub(crate) struct Parts<T: ?Sized> {
    pub(crate) block: BlockRef,
    pub(crate) ptr: NonNull<T>,
}

impl<T: ?Sized> Clone for Parts<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Parts<T> {}

impl<T: ?Sized> Parts<T> {
    pub(crate) fn addr(parts: Option<Self>) -> *const () {
        parts.map_or(ptr::null(), |parts| parts.ptr.cast::<()>().as_ptr().cast_const())
    }

    pub(crate) fn same(a: Option<Self>, b: Option<Self>) -> bool {
        a.map(|parts| parts.block) == b.map(|parts| parts.block) && Self::addr(a) == Self::addr(b)
    }
}

/// A reference counted owning pointer.
///
/// Every `Shared` that points into the same control block owns the managed object together with
/// the others. The object is destroyed when the last of them is dropped; the control block itself
/// stays around until the last [`Weak`] is gone as well.
///
/// A `Shared` may be empty, in which case it owns nothing and [`use_count`][Shared::use_count] is
/// `0`. Handles are neither `Send` nor `Sync`: the counts are not synchronised.
pub struct Shared<T>
where
    T: ?Sized + 'static,
{
    parts: Option<Parts<T>>,
}

impl<T> Shared<T> {
    /// Moves `value` into a new allocation that holds both the value and its control block.
    ///
    /// Aborts through [`handle_alloc_error`] if memory runs out; see
    /// [`make_shared`][crate::make_shared] for the fallible version.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Shared;
    /// let s = Shared::new(5);
    /// assert!(*s == 5);
    /// assert!(s.use_count() == 1);
    /// ```
    pub fn new(value: T) -> Self {
        match crate::make_shared(|| value) {
            Ok(shared) => shared,
            Err(err) => handle_alloc_error(err.layout),
        }
    }
}

impl<T: ?Sized> Shared<T> {
    /// Creates a handle that owns nothing.
    pub const fn empty() -> Self {
        Shared { parts: None }
    }

    /// Takes ownership of an object created with [`Box::into_raw`]. A null `ptr` produces an empty
    /// handle.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` and must not be owned by anything else, including
    /// another `Shared`.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        unsafe { Self::from_raw_with(ptr, DefaultDelete) }
    }

    /// Takes ownership of `ptr`, which is released by `deleter` once the last strong handle is
    /// dropped. A null `ptr` produces an empty handle and `deleter` is never called.
    ///
    /// # Safety
    ///
    /// `deleter` must be able to release `ptr` and nothing else may own it.
    pub unsafe fn from_raw_with<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        match unsafe { Self::from_raw_in(ptr, deleter, Global) } {
            Ok(shared) => shared,
            Err(err) => handle_alloc_error(err.layout),
        }
    }

    /// Like [`from_raw_with`][Shared::from_raw_with], but the control block is allocated from
    /// `alloc`.
    ///
    /// If the control block cannot be allocated, `ptr` is released through `deleter` and the
    /// error is returned.
    ///
    /// # Safety
    ///
    /// See [`from_raw_with`][Shared::from_raw_with].
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(Self::empty());
        };

        let block = unsafe { RegularBlock::adopt(ptr, deleter, alloc)? };

        Ok(unsafe { Self::from_parts(Parts { block, ptr }) })
    }

    /// # Safety
    ///
    /// The caller hands over one strong reference to `parts.block`.
    pub(crate) unsafe fn from_parts(parts: Parts<T>) -> Self {
        Shared { parts: Some(parts) }
    }

    /// Gets the number of strong handles sharing this object, or `0` if the handle is empty.
    pub fn use_count(&self) -> usize {
        self.parts.map_or(0, |parts| parts.block.shared_count())
    }

    /// Gets the number of [`Weak`] handles observing this object, or `0` if the handle is empty.
    pub fn weak_count(&self) -> usize {
        self.parts.map_or(0, |parts| parts.block.weak_count())
    }

    /// Returns `true` if the handle owns nothing.
    pub fn is_empty(&self) -> bool {
        self.parts.is_none()
    }

    /// Gets a reference to the object, or `None` if the handle is empty.
    pub fn get(&self) -> Option<&T> {
        self.parts
            .as_ref()
            .map(|parts| unsafe { parts.ptr.as_ref() })
    }

    /// Gets the object pointer this handle was created with.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.parts.map(|parts| parts.ptr)
    }

    /// Returns `true` if both handles share a control block, regardless of what they point at.
    pub fn ptr_eq<U: ?Sized>(&self, other: &Shared<U>) -> bool {
        self.parts.map(|parts| parts.block) == other.parts.map(|parts| parts.block)
    }

    /// Creates a new weak handle observing the same object.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Shared;
    /// let s = Shared::new(5);
    /// let w = s.downgrade();
    ///
    /// assert!(s.weak_count() == 1);
    /// assert!(*w.lock() == 5);
    /// ```
    pub fn downgrade(&self) -> Weak<T> {
        match self.parts {
            Some(parts) => {
                parts.block.inc_weak();
                unsafe { Weak::from_parts(parts) }
            }
            None => Weak::new(),
        }
    }

    /// Creates a handle to a part of the object. The new handle shares ownership of the whole
    /// object, which stays alive for as long as either handle does.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Shared;
    /// let pair = Shared::new((1, String::from("two")));
    /// let second = pair.project(|(_, s)| s.as_str());
    /// drop(pair);
    ///
    /// assert!(&*second == "two");
    /// ```
    pub fn project<U>(&self, f: impl FnOnce(&T) -> &U) -> Shared<U>
    where
        U: ?Sized + 'static,
    {
        match self.get() {
            Some(value) => {
                let ptr = NonNull::from(f(value));
                unsafe { self.alias(ptr) }
            }
            None => Shared::empty(),
        }
    }

    /// Like [`project`][Shared::project], but consumes `self` instead of adding a strong
    /// reference.
    pub fn map<U>(mut self, f: impl FnOnce(&T) -> &U) -> Shared<U>
    where
        U: ?Sized + 'static,
    {
        let ptr = match self.get() {
            Some(value) => NonNull::from(f(value)),
            None => return Shared::empty(),
        };

        match self.parts.take() {
            Some(parts) => unsafe {
                Shared::from_parts(Parts {
                    block: parts.block,
                    ptr,
                })
            },
            None => Shared::empty(),
        }
    }

    /// Creates a handle that shares ownership with `self` but points at `ptr`. If `self` is empty
    /// the result is empty as well.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for shared access for as long as the object owned by `self` is
    /// alive.
    pub unsafe fn alias<U>(&self, ptr: NonNull<U>) -> Shared<U>
    where
        U: ?Sized + 'static,
    {
        match self.parts {
            Some(parts) => {
                parts.block.inc_shared();
                unsafe {
                    Shared::from_parts(Parts {
                        block: parts.block,
                        ptr,
                    })
                }
            }
            None => Shared::empty(),
        }
    }

    /// Moves the ownership out of `self`, leaving it empty. No count changes.
    pub fn take(&mut self) -> Self {
        Shared {
            parts: self.parts.take(),
        }
    }

    /// Gives up this handle's ownership, leaving it empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tether::Shared;
    /// let mut s1 = Shared::new(5);
    /// let s2 = s1.clone();
    ///
    /// s1.reset();
    /// assert!(s1.is_empty());
    /// assert!(s2.use_count() == 1);
    /// ```
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Exchanges the ownership of two handles. No count changes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.parts, &mut other.parts);
    }
}

impl<T: ?Sized> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(parts) = self.parts.take() {
            unsafe { parts.block.dec_shared() };
        }
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(parts) = self.parts {
            parts.block.inc_shared();
        }

        Shared { parts: self.parts }
    }

    fn clone_from(&mut self, source: &Self) {
        if Parts::same(self.parts, source.parts) {
            return;
        }

        let mut tmp = source.clone();
        self.swap(&mut tmp);
    }
}

impl<T: ?Sized> Default for Shared<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("attempted to dereference an empty `Shared`"),
        }
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        unsafe { Self::from_raw(Box::into_raw(value)) }
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Shared<U>> for Shared<T> {
    fn eq(&self, other: &Shared<U>) -> bool {
        Parts::addr(self.parts) == Parts::addr(other.parts)
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Parts::addr(self.parts).hash(state)
    }
}

impl<T> fmt::Debug for Shared<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("Shared(<empty>)"),
        }
    }
}

impl<T> fmt::Display for Shared<T>
where
    T: ?Sized + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("<empty>"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Parts::addr(self.parts), f)
    }
}
