//! Offset suballocation for growable GPU buffers.
//!
//! This crate provides [`BlockAllocator`], a bookkeeping structure that hands
//! out offsets into a single contiguous, growable buffer, such as a vertex or
//! index buffer object. It never touches memory itself; the caller owns the
//! buffer and uses the returned [`Range`]s to address it.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! | Operation   | Best-case | Worst-case |
//! |-------------|-----------|------------|
//! | Allocate    | O(log k)  | O(k)       |
//! | Free        | O(log k)  | O(k)       |
//! | Expand      | O(log k)  | O(k)       |
//!
//! where k is the number of distinct free block sizes. The worst case is
//! reached only when a size that is not yet tracked has to be inserted into
//! the size bins.
//!
//! #### Fragmentation
//!
//! Free regions are coalesced eagerly, so no two free blocks are ever
//! adjacent. Allocation is best-fit: the smallest free block that can hold
//! the request is split, and the allocation is always taken from the low end
//! of that block.
//!
//! ## Example
//!
//! ```
//! use vbo_alloc::{BlockAllocator, Range};
//!
//! let mut tracker = BlockAllocator::new(500);
//! let a = tracker.allocate(100).unwrap().unwrap();
//! assert_eq!(tracker.range(a).unwrap(), Range::new(0, 100));
//!
//! tracker.free(a).unwrap();
//! assert!(!tracker.has_allocations());
//! ```

#![doc(html_root_url = "https://docs.rs/vbo_alloc/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docs_rs, feature(doc_cfg))]

extern crate alloc;

mod bins;
mod block;
pub mod config;
pub mod error;
mod handle;
mod tracker;


use core::{cmp::Ordering, fmt};

pub use crate::{
    config::{AllocatorConfig, GrowthPolicy},
    error::{ContractViolation, InvariantViolation},
    handle::Handle,
    tracker::{AllocatorStats, BlockAllocator},
};

/// A contiguous region `[pos, pos + size)` of the tracked address space.
///
/// Ranges order by position first and size second.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Range {
    /// The offset of the first unit of the region.
    pub pos: usize,
    /// The number of units in the region.
    pub size: usize,
}

impl Range {
    /// Constructs a new `Range` starting at `pos` and spanning `size` units.
    #[inline]
    pub const fn new(pos: usize, size: usize) -> Range {
        Range { pos, size }
    }

    /// Returns the offset one past the last unit of the region.
    #[inline]
    pub const fn end(&self) -> usize {
        self.pos + self.size
    }

    /// Returns `true` if `offset` lies within the region.
    #[inline]
    pub const fn contains(&self, offset: usize) -> bool {
        self.pos <= offset && offset < self.end()
    }

    /// Returns `true` if `other` starts exactly where `self` ends.
    #[inline]
    pub const fn is_adjacent_to(&self, other: &Range) -> bool {
        self.end() == other.pos
    }

    /// Returns `true` if the two regions share at least one unit.
    #[inline]
    pub const fn overlaps(&self, other: &Range) -> bool {
        self.pos < other.end() && other.pos < self.end()
    }
}

impl Ord for Range {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pos
            .cmp(&other.pos)
            .then_with(|| self.size.cmp(&other.size))
    }
}

impl PartialOrd for Range {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.pos, self.end())
    }
}

impl From<Range> for core::ops::Range<usize> {
    fn from(r: Range) -> Self {
        r.pos..r.end()
    }
}
