use core::fmt;

use crate::block::BlockId;

/// An opaque reference to an allocation made by a [`BlockAllocator`].
///
/// A handle stays valid until it is passed to [`BlockAllocator::free`]. The
/// allocator reuses its internal block records, so every handle carries the
/// generation of the record at the time it was issued; presenting a handle
/// whose generation no longer matches is reported as a stale handle rather
/// than silently addressing some other allocation.
///
/// Handles do not identify the allocator that issued them. Passing a handle to
/// a different allocator is only detected when the index is out of range for
/// that allocator.
///
/// [`BlockAllocator`]: crate::BlockAllocator
/// [`BlockAllocator::free`]: crate::BlockAllocator::free
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct Handle {
    pub(crate) id: BlockId,
    pub(crate) generation: u32,
}

impl Handle {
    #[inline]
    pub(crate) fn new(id: BlockId, generation: u32) -> Handle {
        Handle { id, generation }
    }

    /// Returns the index of the block record this handle refers to.
    #[inline]
    pub fn index(&self) -> usize {
        self.id.index()
    }

    /// Returns the generation of the block record when this handle was issued.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@{})", self.id.index(), self.generation)
    }
}
