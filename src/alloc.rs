use std::{alloc, alloc::Layout, ptr, ptr::NonNull};

use crate::AllocError;

/// Supplies the memory for control blocks.
///
/// Blocks ask for the layout of their own type, so a single allocator value serves every block
/// type it is handed to. The allocator is moved into the block and moved back out right before the
/// block's memory is returned to it.
///
/// # Safety
///
/// `allocate` must return memory that fits `layout` and stays valid until it is passed to
/// `deallocate` with the same layout.
pub unsafe trait Allocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator (or a clone of it) with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Moves `value` into freshly allocated storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and suitably aligned for `T`.
    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        unsafe { ptr.as_ptr().write(value) }
    }

    /// Runs the destructor of the value at `ptr` without freeing its storage.
    ///
    /// # Safety
    ///
    /// `ptr` must point at an initialised value that is never used again.
    unsafe fn destroy<T: ?Sized>(&self, ptr: NonNull<T>) {
        unsafe { ptr::drop_in_place(ptr.as_ptr()) }
    }
}

unsafe impl<A> Allocator for &A
where
    A: Allocator + ?Sized,
{
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        unsafe { (**self).construct(ptr, value) }
    }

    unsafe fn destroy<T: ?Sized>(&self, ptr: NonNull<T>) {
        unsafe { (**self).destroy(ptr) }
    }
}

/// The process-wide allocator behind [`std::alloc::alloc`].
///
/// Zero-size requests get a dangling pointer aligned to the layout and never reach the global
/// allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = if layout.size() == 0 {
            ptr::null_mut::<u8>().wrapping_add(layout.align())
        } else {
            unsafe { alloc::alloc(layout) }
        };

        NonNull::new(ptr).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

/// Destroys the object adopted by a [`Shared`][crate::Shared] once the last strong handle is gone.
///
/// Any `FnOnce(NonNull<T>)` closure is a deleter, which covers objects that need something other
/// than `Box` teardown (pool slots, file handles, foreign resources).
///
/// ```
/// # use std::ptr::NonNull;
/// # use tether::Shared;
/// let close = |p: NonNull<String>| drop(unsafe { Box::from_raw(p.as_ptr()) });
///
/// let raw = Box::into_raw(Box::new(String::from("log")));
/// let s = unsafe { Shared::from_raw_with(raw, close) };
/// assert!(s.use_count() == 1);
/// ```
pub trait Deleter<T: ?Sized> {
    /// # Safety
    ///
    /// `ptr` is the pointer the deleter was adopted with; it is called at most once.
    unsafe fn delete(self, ptr: NonNull<T>);
}

/// Frees objects that came from [`Box::into_raw`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(self, ptr: NonNull<T>) {
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T, F> Deleter<T> for F
where
    T: ?Sized,
    F: FnOnce(NonNull<T>),
{
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}
