use std::convert::Infallible;

use crate::{
    block::CombinedBlock,
    shared::{Parts, Shared},
    AllocError, Allocator, Global, InitError,
};

/// Allocates the control block and the object together and constructs the object in place from
/// `init`.
///
/// # Examples
///
/// ```
/// # use tether::make_shared;
/// let s = make_shared(|| vec![1, 2, 3]).unwrap();
/// assert!(s.len() == 3);
/// assert!(s.use_count() == 1);
/// ```
pub fn make_shared<T>(init: impl FnOnce() -> T) -> Result<Shared<T>, AllocError>
where
    T: 'static,
{
    allocate_shared(Global, init)
}

/// Like [`make_shared`], but the combined allocation comes from `alloc`, which also constructs and
/// destroys the object.
pub fn allocate_shared<T, A>(alloc: A, init: impl FnOnce() -> T) -> Result<Shared<T>, AllocError>
where
    T: 'static,
    A: Allocator + 'static,
{
    try_allocate_shared(alloc, || Ok::<_, Infallible>(init())).map_err(|err| match err {
        InitError::Alloc(err) => err,
        InitError::Init(never) => match never {},
    })
}

/// Like [`allocate_shared`], for objects whose construction can fail. The block's memory is
/// returned to `alloc` before the error is.
///
/// # Examples
///
/// ```
/// # use tether::{try_allocate_shared, Global, InitError};
/// let s = try_allocate_shared(Global, || "42".parse::<u32>()).unwrap();
/// assert!(*s == 42);
///
/// let err = try_allocate_shared(Global, || "x".parse::<u32>()).unwrap_err();
/// assert!(matches!(err, InitError::Init(_)));
/// ```
pub fn try_allocate_shared<T, A, E>(
    alloc: A,
    init: impl FnOnce() -> Result<T, E>,
) -> Result<Shared<T>, InitError<E>>
where
    T: 'static,
    A: Allocator + 'static,
{
    let (block, ptr) = CombinedBlock::try_new(alloc, init)?;

    Ok(unsafe { Shared::from_parts(Parts { block, ptr }) })
}
