use std::{alloc::Layout, fmt, ptr::NonNull, sync::OnceLock};

use crossbeam::channel;
use log::trace;

use crate::{AllocError, Allocator, Global};

/// An [`Allocator`] that recycles the memory of released control blocks.
///
/// A pool serves a single layout, the first one it is asked for. Freed chunks of that layout are
/// parked and handed out again by later allocations; anything else goes straight to [`Global`].
/// Since every control block of a given object type has the same layout, one pool per object type
/// gets every block recycled.
///
/// You usually define a static pool and hand out `&'static` references to it:
///
/// ```
/// # use tether::{allocate_shared, Pool};
/// static POOL: Pool = Pool::new();
///
/// let s = allocate_shared(&POOL, || 5).unwrap();
/// drop(s);
/// assert!(POOL.cached() == 1);
///
/// let _s = allocate_shared(&POOL, || 6).unwrap();
/// assert!(POOL.cached() == 0);
/// ```
pub struct Pool {
    bound: Option<usize>,
    layout: OnceLock<Layout>,
    channel: OnceLock<(
        channel::Sender<AllowSend<NonNull<u8>>>,
        channel::Receiver<AllowSend<NonNull<u8>>>,
    )>,
}

struct AllowSend<T>(T);

unsafe impl<T> Send for AllowSend<T> {}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("layout", &self.layout.get())
            .field("cached", &self.cached())
            .finish()
    }
}

impl Pool {
    /// Creates a pool that parks every chunk handed back to it.
    pub const fn new() -> Self {
        Pool {
            bound: None,
            layout: OnceLock::new(),
            channel: OnceLock::new(),
        }
    }

    /// Creates a pool that parks at most `cap` chunks. Chunks beyond that are freed.
    pub const fn bounded(cap: usize) -> Self {
        Pool {
            bound: Some(cap),
            layout: OnceLock::new(),
            channel: OnceLock::new(),
        }
    }

    /// The layout this pool recycles, once it has served its first allocation.
    pub fn layout(&self) -> Option<Layout> {
        self.layout.get().copied()
    }

    /// The number of chunks currently parked in the pool.
    pub fn cached(&self) -> usize {
        self.channel.get().map_or(0, |(_, recv)| recv.len())
    }

    fn channel(
        &self,
    ) -> &(
        channel::Sender<AllowSend<NonNull<u8>>>,
        channel::Receiver<AllowSend<NonNull<u8>>>,
    ) {
        self.channel.get_or_init(|| match self.bound {
            Some(cap) => channel::bounded(cap),
            None => channel::unbounded(),
        })
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Allocator for Pool {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if *self.layout.get_or_init(|| layout) != layout {
            return Global.allocate(layout);
        }

        if let Ok(chunk) = self.channel().1.try_recv() {
            trace!("reusing pooled chunk {:p}", chunk.0);
            return Ok(chunk.0);
        }

        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if self.layout.get() != Some(&layout) {
            return unsafe { Global.deallocate(ptr, layout) };
        }

        match self.channel().0.try_send(AllowSend(ptr)) {
            Ok(()) => trace!("parked chunk {:p}", ptr),
            // the pool is full
            Err(err) => unsafe { Global.deallocate(err.into_inner().0, layout) },
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let (Some(layout), Some((_, recv))) = (self.layout.get(), self.channel.get()) else {
            return;
        };

        while let Ok(chunk) = recv.try_recv() {
            unsafe { Global.deallocate(chunk.0, *layout) };
        }
    }
}
