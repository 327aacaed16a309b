//! Error types.
//!
//! Running out of space is not an error: [`BlockAllocator::allocate`] reports
//! it by returning `Ok(None)`. The types here cover caller bugs
//! ([`ContractViolation`]) and corrupted bookkeeping
//! ([`InvariantViolation`]).
//!
//! [`BlockAllocator::allocate`]: crate::BlockAllocator::allocate

use thiserror::Error;

use crate::{Handle, Range};

/// A call that violated the allocator's preconditions.
///
/// These are always bugs in the caller. They are detected before any state is
/// modified, so the allocator remains usable after one is returned.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// `allocate` was called with a size of zero.
    #[error("allocation size must be nonzero")]
    ZeroSizeAllocation,

    /// The handle's index does not name any block this allocator has created.
    #[error("{handle} was not issued by this allocator")]
    ForeignHandle {
        /// The offending handle.
        handle: Handle,
    },

    /// The handle's block has since been freed and reused or merged away.
    #[error("{handle} is stale")]
    StaleHandle {
        /// The offending handle.
        handle: Handle,
    },

    /// The handle's block has already been freed.
    #[error("{handle} refers to a block that is already free")]
    AlreadyFree {
        /// The offending handle.
        handle: Handle,
    },

    /// `expand` was called with a capacity that does not exceed the current one.
    #[error("cannot expand capacity from {capacity} to {requested}")]
    NonGrowingExpand {
        /// The capacity before the call.
        capacity: usize,
        /// The requested new capacity.
        requested: usize,
    },

    /// Growing the capacity would overflow `usize`.
    #[error("growing capacity {capacity} by {additional} overflows usize")]
    CapacityOverflow {
        /// The capacity before the call.
        capacity: usize,
        /// The number of units that could not be added.
        additional: usize,
    },
}

/// A broken bookkeeping invariant, as found by [`BlockAllocator::verify`].
///
/// [`BlockAllocator::verify`]: crate::BlockAllocator::verify
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// The chain is empty but the capacity is not, or vice versa.
    #[error("chain presence does not match capacity {capacity}")]
    EmptyMismatch {
        /// The recorded capacity.
        capacity: usize,
    },

    /// The leftmost block does not start at offset zero or has a left link.
    #[error("leftmost block {block} is not the start of the chain")]
    BadLeftmost {
        /// The leftmost block.
        block: Range,
    },

    /// The recorded rightmost block is not the last block of the chain.
    #[error("rightmost block {block} is not the end of the chain")]
    BadRightmost {
        /// The block reached by walking the chain.
        block: Range,
    },

    /// A block in the chain has zero size.
    #[error("block at {pos} has zero size")]
    ZeroSizeBlock {
        /// The offset of the block.
        pos: usize,
    },

    /// Two consecutive blocks leave a gap or overlap.
    #[error("block {left} is not contiguous with {right}")]
    Discontiguous {
        /// The left block.
        left: Range,
        /// The right block.
        right: Range,
    },

    /// A block's right neighbour does not link back to it.
    #[error("block {block} is not the left neighbour of its right neighbour")]
    BrokenBackLink {
        /// The block whose neighbour is inconsistent.
        block: Range,
    },

    /// The sum of block sizes differs from the capacity.
    #[error("blocks cover {covered} units but capacity is {capacity}")]
    CoverageMismatch {
        /// The sum of all block sizes.
        covered: usize,
        /// The recorded capacity.
        capacity: usize,
    },

    /// Two physically adjacent blocks are both free.
    #[error("free blocks {left} and {right} were not coalesced")]
    UncoalescedFree {
        /// The left block.
        left: Range,
        /// The right block.
        right: Range,
    },

    /// A used block still carries size-bin links.
    #[error("used block {block} is linked into a size bin")]
    UsedBlockInBin {
        /// The used block.
        block: Range,
    },

    /// A recycled record was found in the chain or a bin.
    #[error("recycled record {index} is reachable")]
    RecycledReachable {
        /// The arena index of the record.
        index: usize,
    },

    /// A block found in a size bin is not free.
    #[error("bin member {block} is not free")]
    NonFreeInBin {
        /// The offending block.
        block: Range,
    },

    /// A bin head has a previous link.
    #[error("bin head {block} has a previous link")]
    BinHeadHasPrev {
        /// The bin head.
        block: Range,
    },

    /// A free block in the chain cannot be reached from the bins.
    #[error("free block {block} is missing from its size bin")]
    MissingFromBin {
        /// The unreachable block.
        block: Range,
    },

    /// A bin member's size differs from its bin's size.
    #[error("block {block} is in the bin for size {bin_size}")]
    WrongBin {
        /// The misplaced block.
        block: Range,
        /// The size of the bin it was found in.
        bin_size: usize,
    },

    /// A bin member's successor does not link back to it.
    #[error("bin member {block} is not the predecessor of its successor")]
    BrokenBinLink {
        /// The bin member.
        block: Range,
    },

    /// The bin sizes are not strictly ascending.
    #[error("bin for size {next} follows bin for size {prev}")]
    UnsortedBins {
        /// The size of the earlier bin.
        prev: usize,
        /// The size of the later bin.
        next: usize,
    },

    /// The number of free blocks in the chain differs from the number in bins.
    #[error("chain has {in_chain} free blocks but bins hold {in_bins}")]
    FreeCountMismatch {
        /// Free blocks found by walking the chain.
        in_chain: usize,
        /// Blocks found by walking the bins.
        in_bins: usize,
    },
}
