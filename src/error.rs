use std::alloc::Layout;

use thiserror::Error;

/// An [`Allocator`][crate::Allocator] could not satisfy a request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate {} bytes with alignment {}", .layout.size(), .layout.align())]
pub struct AllocError {
    pub layout: Layout,
}

impl AllocError {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }
}

/// Returned by [`try_allocate_shared`][crate::try_allocate_shared] when either the control block
/// could not be allocated or the initialiser of the managed object failed.
///
/// In both cases nothing is left allocated.
#[derive(Error, Debug)]
pub enum InitError<E> {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error("failed to construct the managed object: {0}")]
    Init(E),
}
