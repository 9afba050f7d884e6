use std::{
    alloc::Layout,
    any::type_name,
    cell::Cell,
    mem::{ManuallyDrop, MaybeUninit},
    process,
    ptr::{self, NonNull},
};

use log::trace;
use scopeguard::ScopeGuard;

use crate::{AllocError, Allocator, Deleter, InitError};

/// The dispatch table of a control block variant.
pub(crate) struct BlockOps {
    /// Destroys the managed object. Runs once, when the shared count drops to zero.
    release_object: unsafe fn(NonNull<ControlBlock>),

    /// Frees the block. Runs once, after `release_object`, when both counts are zero.
    release_block: unsafe fn(NonNull<ControlBlock>),
}

/// The header every control block variant starts with.
#[repr(C)]
pub(crate) struct ControlBlock {
    shared: Cell<usize>,
    weak: Cell<usize>,
    ops: &'static BlockOps,
}

impl ControlBlock {
    fn new(ops: &'static BlockOps) -> Self {
        ControlBlock {
            shared: Cell::new(1),
            weak: Cell::new(0),
            ops,
        }
    }
}

/// A type-erased pointer to a control block that is kept alive by the handle holding it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockRef(NonNull<ControlBlock>);

impl BlockRef {
    fn header(&self) -> &ControlBlock {
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn shared_count(self) -> usize {
        self.header().shared.get()
    }

    pub(crate) fn weak_count(self) -> usize {
        self.header().weak.get()
    }

    pub(crate) fn inc_shared(self) {
        increment(&self.header().shared);
    }

    /// Adds a strong reference unless the object has already been released.
    pub(crate) fn try_inc_shared(self) -> bool {
        let shared = &self.header().shared;
        if shared.get() == 0 {
            return false;
        }

        increment(shared);
        true
    }

    pub(crate) fn inc_weak(self) {
        increment(&self.header().weak);
    }

    /// Gives up one strong reference.
    ///
    /// # Safety
    ///
    /// The caller owns a strong reference and never touches the block through it again.
    pub(crate) unsafe fn dec_shared(self) {
        let header = self.header();
        debug_assert!(header.shared.get() > 0);

        let shared = header.shared.get() - 1;
        header.shared.set(shared);
        if shared > 0 {
            return;
        }

        // The block holds an implicit weak reference while the object is torn down, so that weak
        // handles dropped by the object's destructor cannot free the block under us.
        increment(&header.weak);
        let release_object = header.ops.release_object;
        let guard = scopeguard::guard(self, |block| unsafe { block.dec_weak() });

        unsafe { release_object(self.0) };
        drop(guard);
    }

    /// Gives up one weak reference.
    ///
    /// # Safety
    ///
    /// The caller owns a weak reference and never touches the block through it again.
    pub(crate) unsafe fn dec_weak(self) {
        let header = self.header();
        debug_assert!(header.weak.get() > 0);

        let weak = header.weak.get() - 1;
        header.weak.set(weak);
        if weak > 0 || header.shared.get() > 0 {
            return;
        }

        let release_block = header.ops.release_block;
        unsafe { release_block(self.0) };
    }
}

fn increment(count: &Cell<usize>) {
    match count.get().checked_add(1) {
        Some(n) => count.set(n),
        // only reachable by leaking handles in a loop
        None => process::abort(),
    }
}

// === RegularBlock === //

/// A control block for an object that was allocated on its own and is adopted by pointer.
#[repr(C)]
pub(crate) struct RegularBlock<T: ?Sized, A, D> {
    header: ControlBlock,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T, A, D> RegularBlock<T, A, D>
where
    T: ?Sized,
    A: Allocator,
    D: Deleter<T>,
{
    const OPS: BlockOps = BlockOps {
        release_object: Self::release_object,
        release_block: Self::release_block,
    };

    /// Allocates a block that owns `ptr`. If the allocation fails `ptr` is handed to `deleter`
    /// before the error is returned.
    ///
    /// # Safety
    ///
    /// `deleter` must be able to release `ptr`, and nothing else may own it.
    pub(crate) unsafe fn adopt(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<BlockRef, AllocError> {
        let layout = Layout::new::<Self>();
        let mem = match alloc.allocate(layout) {
            Ok(mem) => mem.cast::<Self>(),
            Err(err) => {
                unsafe { deleter.delete(ptr) };
                return Err(err);
            }
        };

        unsafe {
            mem.as_ptr().write(RegularBlock {
                header: ControlBlock::new(&Self::OPS),
                ptr,
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
            });
        }
        trace!("adopted {} into control block {:p}", type_name::<T>(), mem);

        Ok(BlockRef(mem.cast()))
    }

    unsafe fn release_object(block: NonNull<ControlBlock>) {
        let this = block.cast::<Self>().as_ptr();

        unsafe {
            let deleter = ManuallyDrop::take(&mut (*this).deleter);
            deleter.delete((*this).ptr);
        }
    }

    unsafe fn release_block(block: NonNull<ControlBlock>) {
        let this = block.cast::<Self>();

        unsafe {
            let alloc = ManuallyDrop::take(&mut (*this.as_ptr()).alloc);
            alloc.deallocate(this.cast(), Layout::new::<Self>());
        }
        trace!("released control block {:p}", this);
    }
}

// === CombinedBlock === //

/// A control block with the managed object stored inline, built with a single allocation.
#[repr(C)]
pub(crate) struct CombinedBlock<T, A> {
    header: ControlBlock,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

impl<T, A> CombinedBlock<T, A>
where
    A: Allocator,
{
    const OPS: BlockOps = BlockOps {
        release_object: Self::release_object,
        release_block: Self::release_block,
    };

    /// Allocates a block and constructs its object in place from `init`. Returns the block and a
    /// pointer to the object inside it.
    ///
    /// `init` runs after the allocation. If it fails or panics, the block's memory goes back to
    /// `alloc` before the failure propagates.
    pub(crate) fn try_new<E>(
        alloc: A,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<(BlockRef, NonNull<T>), InitError<E>> {
        let layout = Layout::new::<Self>();
        let mem = alloc.allocate(layout)?.cast::<Self>();
        let this = mem.as_ptr();

        let guard = scopeguard::guard(alloc, |alloc| unsafe {
            alloc.deallocate(mem.cast(), layout);
        });

        let value = init().map_err(InitError::Init)?;
        let slot = unsafe { NonNull::new_unchecked(ptr::addr_of_mut!((*this).value).cast::<T>()) };
        unsafe { guard.construct(slot, value) };

        // Defuse guard
        let alloc = ScopeGuard::into_inner(guard);

        unsafe {
            ptr::addr_of_mut!((*this).header).write(ControlBlock::new(&Self::OPS));
            ptr::addr_of_mut!((*this).alloc).write(ManuallyDrop::new(alloc));
        }
        trace!("constructed {} in control block {:p}", type_name::<T>(), mem);

        Ok((BlockRef(mem.cast()), slot))
    }

    unsafe fn release_object(block: NonNull<ControlBlock>) {
        let this = block.cast::<Self>().as_ptr();

        unsafe {
            let alloc: &A = &(*this).alloc;
            let slot = NonNull::new_unchecked(ptr::addr_of_mut!((*this).value).cast::<T>());
            alloc.destroy(slot);
        }
    }

    unsafe fn release_block(block: NonNull<ControlBlock>) {
        let this = block.cast::<Self>();

        unsafe {
            let alloc = ManuallyDrop::take(&mut (*this.as_ptr()).alloc);
            alloc.deallocate(this.cast(), Layout::new::<Self>());
        }
        trace!("released control block {:p}", this);
    }
}
