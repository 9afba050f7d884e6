//! Reference counted [`Shared`] and [`Weak`] handles with pluggable deleters and allocators.
//!
//! A `Shared` owns its object together with every other `Shared` pointing into the same control
//! block; the object is destroyed when the last of them goes away. A `Weak` observes the object
//! without keeping it alive and can be [`lock`][Weak::lock]ed back into a `Shared` while the object
//! still exists.
//!
//! There are two kinds of control block:
//!
//! - Objects allocated on their own are adopted by pointer with [`Shared::from_raw`] and friends.
//!   The block stores the pointer and a [`Deleter`] that releases it, and its own memory comes from
//!   an [`Allocator`].
//! - [`make_shared`], [`allocate_shared`] and [`try_allocate_shared`] place the object inside the
//!   control block, so both live in a single allocation.
//!
//! A handle stores the object pointer next to the control block pointer, so it can point at a part
//! of the object ([`Shared::project`]) while keeping all of it alive.
//!
//! The counts are plain cells. Handles are neither `Send` nor `Sync`, and handles sharing a block
//! must stay on one thread.

mod alloc;
mod block;
mod error;
mod make;
mod pool;
mod shared;
mod weak;

pub use crate::{
    alloc::{Allocator, DefaultDelete, Deleter, Global},
    error::{AllocError, InitError},
    make::{allocate_shared, make_shared, try_allocate_shared},
    pool::Pool,
    shared::Shared,
    weak::Weak,
};

#[cfg(test)]
mod test;
