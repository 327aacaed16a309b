//! Best-fit suballocation with eager coalescing.
//!
//! A [`BlockAllocator`] divides `[0, capacity)` into a chain of blocks, each
//! either free or used. Allocation takes the smallest free block that can hold
//! the request and splits the allocation off its low end. Freeing a block
//! merges it with any free physical neighbours, so free regions are always
//! maximal. Capacity can be grown at any time, which extends the free block at
//! the end of the buffer or appends a new one.

use alloc::vec::Vec;
use core::fmt;

use tracing::{debug, trace, warn};

use crate::{
    bins::SizeBins,
    block::{BlockArena, BlockId, BlockState},
    config::{AllocatorConfig, GrowthPolicy},
    error::{ContractViolation, InvariantViolation},
    Handle, Range,
};

/// A best-fit tracker of offsets within a growable buffer.
///
/// For a discussion of the allocation strategy, see the [crate-level
/// documentation](crate).
pub struct BlockAllocator {
    arena: BlockArena,
    bins: SizeBins,
    capacity: usize,
    leftmost: Option<BlockId>,
    rightmost: Option<BlockId>,
    growth: GrowthPolicy,
}

impl BlockAllocator {
    /// Constructs a new `BlockAllocator` managing `initial_capacity` units.
    ///
    /// The capacity may be zero, in which case every allocation fails until
    /// [`expand`](Self::expand) is called.
    pub fn new(initial_capacity: usize) -> BlockAllocator {
        BlockAllocator::with_config(AllocatorConfig::new(initial_capacity))
    }

    /// Constructs a new `BlockAllocator` from `config`.
    pub fn with_config(config: AllocatorConfig) -> BlockAllocator {
        let mut tracker = BlockAllocator {
            arena: BlockArena::new(),
            bins: SizeBins::new(),
            capacity: 0,
            leftmost: None,
            rightmost: None,
            growth: config.growth,
        };

        if config.initial_capacity > 0 {
            tracker.grow_to(config.initial_capacity);
        }

        tracker
    }

    /// Returns the total number of units managed by this allocator.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the growth policy used by [`allocate_or_grow`](Self::allocate_or_grow).
    #[inline]
    pub fn growth_policy(&self) -> GrowthPolicy {
        self.growth
    }

    /// Attempts to allocate `size` contiguous units.
    ///
    /// The smallest free block that can hold `size` units is chosen, and the
    /// allocation is taken from its lowest offsets.
    ///
    /// Returns `Ok(None)` if no free block is large enough. The allocator is
    /// not modified in that case.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation::ZeroSizeAllocation`] if `size` is zero.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Handle>, ContractViolation> {
        if size == 0 {
            warn!("rejected zero-size allocation");
            return Err(ContractViolation::ZeroSizeAllocation);
        }

        let bin = self.bins.find_first_larger_or_equal(&self.arena, size);
        if bin == self.bins.len() {
            trace!(
                size,
                largest = self.largest_possible_allocation(),
                "no free block large enough"
            );
            return Ok(None);
        }

        let block = self.bins.pop_at(&mut self.arena, bin);

        let allocated = if self.arena.get(block).size == size {
            // Exact fit: hand out the whole block.
            self.arena.get_mut(block).state = BlockState::Used;
            block
        } else {
            // Split off the low end of `block`.
            let pos = self.arena.get(block).pos;
            let new_block = self.arena.obtain(pos, size, BlockState::Used);
            if self.arena.insert_left_of(block, new_block) {
                self.leftmost = Some(new_block);
            }

            let remainder = self.arena.get_mut(block);
            debug_assert!(remainder.size > size);
            remainder.pos += size;
            remainder.size -= size;
            self.bins.link(&mut self.arena, block);

            new_block
        };

        let handle = self.issue(allocated);
        trace!(%handle, pos = self.arena.get(allocated).pos, size, "allocated");

        self.validate();
        Ok(Some(handle))
    }

    /// Allocates `size` contiguous units, expanding the capacity if needed.
    ///
    /// When no free block is large enough, the capacity is grown according to
    /// the allocator's [`GrowthPolicy`] so that the request is guaranteed to
    /// fit, and the allocation is retried.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation::ZeroSizeAllocation`] if `size` is zero, or
    /// [`ContractViolation::CapacityOverflow`] if the required capacity does
    /// not fit in a `usize`.
    pub fn allocate_or_grow(&mut self, size: usize) -> Result<Handle, ContractViolation> {
        if let Some(handle) = self.allocate(size)? {
            return Ok(handle);
        }

        let trailing_free = self
            .rightmost
            .map(|id| self.arena.get(id))
            .filter(|block| block.is_free())
            .map_or(0, |block| block.size);

        let new_capacity = self
            .growth
            .next_capacity(self.capacity, trailing_free, size)
            .inspect_err(|e| warn!(size, error = %e, "cannot grow to fit allocation"))?;

        debug!(
            size,
            from = self.capacity,
            to = new_capacity,
            "growing to fit allocation"
        );
        self.expand(new_capacity)?;

        // The free block at the end of the buffer now holds at least `size`
        // units.
        let handle = self
            .allocate(size)?
            .expect("allocation must fit after growing the capacity");

        Ok(handle)
    }

    /// Frees the allocation referred to by `handle`.
    ///
    /// The freed block is merged with its free physical neighbours. Returns
    /// the region the allocation occupied.
    ///
    /// # Errors
    ///
    /// Returns an error if `handle` does not refer to a live allocation of
    /// this allocator. See [`ContractViolation`] for the possible cases.
    pub fn free(&mut self, handle: Handle) -> Result<Range, ContractViolation> {
        let block = self
            .resolve(handle)
            .inspect_err(|e| warn!(error = %e, "rejected free"))?;

        let freed = self.arena.get(block).range();

        let (left, right) = {
            let b = self.arena.get(block);
            let is_free = |id: &BlockId| self.arena.get(*id).is_free();
            (b.left.filter(is_free), b.right.filter(is_free))
        };

        match (left, right) {
            // Merge block and right into left.
            (Some(left), Some(right)) => {
                self.bins.unlink(&mut self.arena, left);
                self.bins.unlink(&mut self.arena, right);

                let absorbed = freed.size + self.arena.get(right).size;
                self.arena.get_mut(left).size += absorbed;

                let removed = self.arena.unlink_right_of(left);
                debug_assert_eq!(removed, block);
                let removed = self.arena.unlink_right_of(left);
                debug_assert_eq!(removed, right);

                if self.rightmost == Some(right) {
                    self.rightmost = Some(left);
                }

                self.arena.recycle(block);
                self.arena.recycle(right);
                self.bins.link(&mut self.arena, left);
            }

            // Merge block into left.
            (Some(left), None) => {
                self.bins.unlink(&mut self.arena, left);

                self.arena.get_mut(left).size += freed.size;

                let removed = self.arena.unlink_right_of(left);
                debug_assert_eq!(removed, block);

                if self.rightmost == Some(block) {
                    self.rightmost = Some(left);
                }

                self.arena.recycle(block);
                self.bins.link(&mut self.arena, left);
            }

            // Merge right into block.
            (None, Some(right)) => {
                self.bins.unlink(&mut self.arena, right);

                let absorbed = self.arena.get(right).size;
                {
                    let b = self.arena.get_mut(block);
                    b.size += absorbed;
                    b.state = BlockState::Free;
                }

                let removed = self.arena.unlink_right_of(block);
                debug_assert_eq!(removed, right);

                if self.rightmost == Some(right) {
                    self.rightmost = Some(block);
                }

                self.arena.recycle(right);
                self.bins.link(&mut self.arena, block);
            }

            // No free neighbours.
            (None, None) => {
                self.arena.get_mut(block).state = BlockState::Free;
                self.bins.link(&mut self.arena, block);
            }
        }

        trace!(%handle, pos = freed.pos, size = freed.size, "freed");

        self.validate();
        Ok(freed)
    }

    /// Grows the capacity to `new_capacity` units.
    ///
    /// If the buffer ends in a free block, that block is extended; otherwise a
    /// new free block is appended.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation::NonGrowingExpand`] if `new_capacity` is not
    /// greater than the current capacity.
    pub fn expand(&mut self, new_capacity: usize) -> Result<(), ContractViolation> {
        if new_capacity <= self.capacity {
            let e = ContractViolation::NonGrowingExpand {
                capacity: self.capacity,
                requested: new_capacity,
            };
            warn!(error = %e, "rejected expand");
            return Err(e);
        }

        self.grow_to(new_capacity);

        self.validate();
        Ok(())
    }

    fn grow_to(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > self.capacity);
        let additional = new_capacity - self.capacity;

        match self.rightmost {
            // First block of an empty allocator.
            None => {
                let block = self.arena.obtain(0, new_capacity, BlockState::Free);
                self.leftmost = Some(block);
                self.rightmost = Some(block);
                self.bins.link(&mut self.arena, block);
            }

            // The buffer ends in a free block; extend it.
            Some(last) if self.arena.get(last).is_free() => {
                self.bins.unlink(&mut self.arena, last);
                self.arena.get_mut(last).size += additional;
                self.bins.link(&mut self.arena, last);
            }

            // The buffer ends in a used block; append a free one.
            Some(last) => {
                let block = self.arena.obtain(self.capacity, additional, BlockState::Free);
                self.arena.insert_right_of(last, block);
                self.rightmost = Some(block);
                self.bins.link(&mut self.arena, block);
            }
        }

        debug!(from = self.capacity, to = new_capacity, "expanded capacity");
        self.capacity = new_capacity;
    }

    /// Returns the region occupied by the allocation referred to by `handle`.
    ///
    /// # Errors
    ///
    /// Returns an error if `handle` does not refer to a live allocation of
    /// this allocator.
    pub fn range(&self, handle: Handle) -> Result<Range, ContractViolation> {
        self.resolve(handle).map(|id| self.arena.get(id).range())
    }

    /// Returns `true` if `handle` refers to a live allocation of this
    /// allocator.
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Returns `true` if any part of the buffer is allocated.
    pub fn has_allocations(&self) -> bool {
        // Adjacent free blocks are always merged, so this inspects at most two
        // blocks before finding a used one.
        self.arena
            .chain(self.leftmost)
            .any(|(_, block)| block.is_used())
    }

    /// Returns the free regions, sorted by offset.
    pub fn free_blocks(&self) -> Vec<Range> {
        self.collect_ranges(BlockState::Free)
    }

    /// Returns the allocated regions, sorted by offset.
    pub fn used_blocks(&self) -> Vec<Range> {
        self.collect_ranges(BlockState::Used)
    }

    fn collect_ranges(&self, state: BlockState) -> Vec<Range> {
        // The chain is in address order, so the result is already sorted and
        // free of duplicates.
        self.arena
            .chain(self.leftmost)
            .filter(|(_, block)| block.state == state)
            .map(|(_, block)| block.range())
            .collect()
    }

    /// Returns the size of the largest request that [`allocate`] would
    /// currently satisfy, or zero if nothing is free.
    ///
    /// [`allocate`]: Self::allocate
    #[inline]
    pub fn largest_possible_allocation(&self) -> usize {
        self.bins.largest(&self.arena)
    }

    /// Returns a summary of the allocator's current state.
    pub fn stats(&self) -> AllocatorStats {
        let mut stats = AllocatorStats {
            capacity: self.capacity,
            bins: self.bins.len(),
            largest_free: self.largest_possible_allocation(),
            recycled_records: self.arena.recycled_len(),
            ..AllocatorStats::default()
        };

        for (_, block) in self.arena.chain(self.leftmost) {
            if block.is_free() {
                stats.free_units += block.size;
                stats.free_blocks += 1;
            } else {
                stats.used_units += block.size;
                stats.used_blocks += 1;
            }
        }

        stats
    }

    /// Checks every bookkeeping invariant.
    ///
    /// This walks the whole chain and every size bin. It is intended for tests
    /// and debugging; with the `validate` feature it runs automatically after
    /// every mutating call.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant found.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let (leftmost, rightmost) = match (self.leftmost, self.rightmost) {
            (None, None) if self.capacity == 0 => {
                if !self.bins.is_empty() {
                    return Err(InvariantViolation::FreeCountMismatch {
                        in_chain: 0,
                        in_bins: self.bins.len(),
                    });
                }

                return Ok(());
            }
            (Some(l), Some(r)) if self.capacity > 0 => (l, r),
            _ => {
                return Err(InvariantViolation::EmptyMismatch {
                    capacity: self.capacity,
                })
            }
        };

        let first = self.arena.get(leftmost);
        if first.pos != 0 || first.left.is_some() {
            return Err(InvariantViolation::BadLeftmost {
                block: first.range(),
            });
        }

        let free_in_chain = self.verify_chain(leftmost, rightmost)?;
        let in_bins = self.verify_bins()?;

        if free_in_chain != in_bins {
            return Err(InvariantViolation::FreeCountMismatch {
                in_chain: free_in_chain,
                in_bins,
            });
        }

        Ok(())
    }

    /// Verifies the physical chain and returns the number of free blocks in it.
    fn verify_chain(
        &self,
        leftmost: BlockId,
        rightmost: BlockId,
    ) -> Result<usize, InvariantViolation> {
        let mut covered = 0usize;
        let mut free_count = 0;
        let mut visited = 0;
        let mut last = leftmost;

        for (id, block) in self.arena.chain(Some(leftmost)) {
            visited += 1;
            if visited > self.arena.len() {
                // The chain loops back on itself.
                return Err(InvariantViolation::BadRightmost {
                    block: block.range(),
                });
            }

            match block.state {
                BlockState::Recycled => {
                    return Err(InvariantViolation::RecycledReachable { index: id.index() })
                }

                BlockState::Free => {
                    free_count += 1;

                    // Only bin heads lack a predecessor, and the head for this
                    // size must be this block.
                    if block.prev_of_same_size.is_none() {
                        let bin = self.bins.find_first_larger_or_equal(&self.arena, block.size);
                        if self.bins.heads().get(bin) != Some(&id) {
                            return Err(InvariantViolation::MissingFromBin {
                                block: block.range(),
                            });
                        }
                    }
                }

                BlockState::Used => {
                    if block.prev_of_same_size.is_some() || block.next_of_same_size.is_some() {
                        return Err(InvariantViolation::UsedBlockInBin {
                            block: block.range(),
                        });
                    }
                }
            }

            if block.size == 0 {
                return Err(InvariantViolation::ZeroSizeBlock { pos: block.pos });
            }
            covered = covered.saturating_add(block.size);

            if let Some(r) = block.right {
                let right = self.arena.get(r);

                if right.left != Some(id) {
                    return Err(InvariantViolation::BrokenBackLink {
                        block: block.range(),
                    });
                }

                if right.pos != block.end() {
                    return Err(InvariantViolation::Discontiguous {
                        left: block.range(),
                        right: right.range(),
                    });
                }

                if block.is_free() && right.is_free() {
                    return Err(InvariantViolation::UncoalescedFree {
                        left: block.range(),
                        right: right.range(),
                    });
                }
            }

            last = id;
        }

        if last != rightmost {
            return Err(InvariantViolation::BadRightmost {
                block: self.arena.get(last).range(),
            });
        }

        if covered != self.capacity {
            return Err(InvariantViolation::CoverageMismatch {
                covered,
                capacity: self.capacity,
            });
        }

        Ok(free_count)
    }

    /// Verifies the size bins and returns the number of blocks they hold.
    fn verify_bins(&self) -> Result<usize, InvariantViolation> {
        let mut count = 0;
        let mut prev_size = None;

        for &head in self.bins.heads() {
            let head_block = self.arena.get(head);
            let bin_size = head_block.size;

            if head_block.prev_of_same_size.is_some() {
                return Err(InvariantViolation::BinHeadHasPrev {
                    block: head_block.range(),
                });
            }

            if let Some(prev) = prev_size {
                if bin_size <= prev {
                    return Err(InvariantViolation::UnsortedBins {
                        prev,
                        next: bin_size,
                    });
                }
            }
            prev_size = Some(bin_size);

            let mut current = Some(head);
            while let Some(id) = current {
                let block = self.arena.get(id);

                match block.state {
                    BlockState::Free => (),
                    BlockState::Used => {
                        return Err(InvariantViolation::NonFreeInBin {
                            block: block.range(),
                        })
                    }
                    BlockState::Recycled => {
                        return Err(InvariantViolation::RecycledReachable { index: id.index() })
                    }
                }

                if block.size != bin_size {
                    return Err(InvariantViolation::WrongBin {
                        block: block.range(),
                        bin_size,
                    });
                }

                if let Some(next) = block.next_of_same_size {
                    if self.arena.get(next).prev_of_same_size != Some(id) {
                        return Err(InvariantViolation::BrokenBinLink {
                            block: block.range(),
                        });
                    }
                }

                count += 1;
                if count > self.arena.len() {
                    // A bin list loops back on itself.
                    return Err(InvariantViolation::BrokenBinLink {
                        block: block.range(),
                    });
                }

                current = block.next_of_same_size;
            }
        }

        Ok(count)
    }

    /// Runs `verify` after a mutation when validation is enabled.
    #[inline]
    fn validate(&self) {
        #[cfg(any(test, feature = "validate"))]
        if let Err(e) = self.verify() {
            panic!("block allocator invariant violated: {e}");
        }
    }

    /// Maps `handle` to its block, checking that it is a live allocation.
    fn resolve(&self, handle: Handle) -> Result<BlockId, ContractViolation> {
        let block = self
            .arena
            .try_get(handle.index())
            .ok_or(ContractViolation::ForeignHandle { handle })?;

        if block.generation != handle.generation {
            return Err(ContractViolation::StaleHandle { handle });
        }

        match block.state {
            BlockState::Used => Ok(handle.id),
            BlockState::Free => Err(ContractViolation::AlreadyFree { handle }),
            BlockState::Recycled => Err(ContractViolation::StaleHandle { handle }),
        }
    }

    /// Issues a fresh handle to a block that was just marked used.
    fn issue(&mut self, id: BlockId) -> Handle {
        debug_assert!(self.arena.get(id).is_used());
        let generation = self.arena.next_generation(id);
        Handle::new(id, generation)
    }
}

impl Default for BlockAllocator {
    fn default() -> Self {
        BlockAllocator::new(0)
    }
}

impl fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("capacity", &self.capacity)
            .field("blocks", &self.arena.len())
            .field("bins", &self.bins.len())
            .field("largest_free", &self.largest_possible_allocation())
            .finish()
    }
}

/// A snapshot of a [`BlockAllocator`]'s bookkeeping, as returned by
/// [`BlockAllocator::stats`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Total number of managed units.
    pub capacity: usize,
    /// Units in free blocks.
    pub free_units: usize,
    /// Units in used blocks.
    pub used_units: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Number of used blocks.
    pub used_blocks: usize,
    /// Number of distinct free block sizes.
    pub bins: usize,
    /// Size of the largest free block.
    pub largest_free: usize,
    /// Block records waiting to be reused.
    pub recycled_records: usize,
}

impl AllocatorStats {
    /// Returns the share of free space that lies outside the largest free
    /// block, from `0.0` (all free space is contiguous) towards `1.0`.
    pub fn fragmentation(&self) -> f64 {
        if self.free_units == 0 {
            return 0.0;
        }

        1.0 - self.largest_free as f64 / self.free_units as f64
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;

    use super::*;

    fn alloc(tracker: &mut BlockAllocator, size: usize) -> Handle {
        tracker
            .allocate(size)
            .unwrap()
            .unwrap_or_else(|| panic!("allocate({size}) failed"))
    }

    fn pos_of(tracker: &BlockAllocator, handle: Handle) -> usize {
        tracker.range(handle).unwrap().pos
    }

    /// Five 100-unit allocations filling a 500-unit buffer.
    fn filled_500() -> (BlockAllocator, Vec<Handle>) {
        let mut tracker = BlockAllocator::new(500);
        let handles = (0..5).map(|_| alloc(&mut tracker, 100)).collect();
        (tracker, handles)
    }

    #[test]
    fn fill_exactly_then_exhaust() {
        let (mut tracker, handles) = filled_500();

        let offsets: Vec<_> = handles.iter().map(|&h| pos_of(&tracker, h)).collect();
        assert_eq!(offsets, vec![0, 100, 200, 300, 400]);

        assert_eq!(tracker.allocate(1), Ok(None));
        assert!(tracker.free_blocks().is_empty());
        assert_eq!(tracker.largest_possible_allocation(), 0);
    }

    #[test]
    fn freeing_middle_blocks_coalesces() {
        let (mut tracker, handles) = filled_500();

        assert_eq!(tracker.free(handles[1]), Ok(Range::new(100, 100)));
        assert_eq!(tracker.free(handles[3]), Ok(Range::new(300, 100)));
        assert_eq!(
            tracker.free_blocks(),
            vec![Range::new(100, 100), Range::new(300, 100)]
        );

        assert_eq!(tracker.free(handles[2]), Ok(Range::new(200, 100)));
        assert_eq!(tracker.free_blocks(), vec![Range::new(100, 300)]);

        assert_eq!(tracker.allocate(301), Ok(None));
        let h = alloc(&mut tracker, 300);
        assert_eq!(pos_of(&tracker, h), 100);
    }

    #[test]
    fn expand_grows_trailing_free_block() {
        let mut tracker = BlockAllocator::new(200);
        let h = alloc(&mut tracker, 100);
        assert_eq!(pos_of(&tracker, h), 0);
        assert_eq!(tracker.free_blocks(), vec![Range::new(100, 100)]);

        tracker.expand(500).unwrap();
        assert_eq!(tracker.capacity(), 500);
        assert_eq!(tracker.free_blocks(), vec![Range::new(100, 400)]);
        assert_eq!(tracker.largest_possible_allocation(), 400);
    }

    #[test]
    fn expand_from_empty() {
        let mut tracker = BlockAllocator::default();
        assert_eq!(tracker.capacity(), 0);
        assert_eq!(tracker.allocate(1), Ok(None));

        tracker.expand(100).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 100)]);
        assert!(tracker.used_blocks().is_empty());
        assert!(!tracker.has_allocations());
    }

    #[test]
    fn expand_after_used_tail_appends_block() {
        let mut tracker = BlockAllocator::new(100);
        let h = alloc(&mut tracker, 100);

        tracker.expand(150).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(100, 50)]);
        assert_eq!(tracker.used_blocks(), vec![Range::new(0, 100)]);

        // Freeing the old tail merges with the appended block.
        tracker.free(h).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 150)]);
    }

    #[test]
    fn expand_must_grow() {
        let mut tracker = BlockAllocator::new(100);
        assert_eq!(
            tracker.expand(100),
            Err(ContractViolation::NonGrowingExpand {
                capacity: 100,
                requested: 100,
            })
        );
        assert_eq!(
            tracker.expand(10),
            Err(ContractViolation::NonGrowingExpand {
                capacity: 100,
                requested: 10,
            })
        );
        assert_eq!(tracker.capacity(), 100);

        let mut empty = BlockAllocator::new(0);
        assert!(empty.expand(0).is_err());
    }

    #[test]
    fn zero_size_allocation_is_rejected() {
        let mut tracker = BlockAllocator::new(100);
        assert_eq!(
            tracker.allocate(0),
            Err(ContractViolation::ZeroSizeAllocation)
        );
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 100)]);
    }

    #[test]
    fn exact_fit_reuses_block() {
        let mut tracker = BlockAllocator::new(300);
        let a = alloc(&mut tracker, 100);
        let _b = alloc(&mut tracker, 100);
        tracker.free(a).unwrap();

        let records = tracker.stats().recycled_records;
        let c = alloc(&mut tracker, 100);
        assert_eq!(pos_of(&tracker, c), 0);
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(tracker.stats().recycled_records, records);
    }

    #[test]
    fn best_fit_prefers_smallest_block() {
        let mut tracker = BlockAllocator::new(1000);
        let a = alloc(&mut tracker, 300);
        let _b = alloc(&mut tracker, 10);
        let c = alloc(&mut tracker, 50);
        let _d = alloc(&mut tracker, 10);
        // Free regions: [0, 300), [310, 360), [370, 1000).
        tracker.free(a).unwrap();
        tracker.free(c).unwrap();

        let e = alloc(&mut tracker, 40);
        assert_eq!(pos_of(&tracker, e), 310);
        let f = alloc(&mut tracker, 200);
        assert_eq!(pos_of(&tracker, f), 0);
    }

    #[test]
    fn free_with_only_left_free_neighbour() {
        let mut tracker = BlockAllocator::new(300);
        let a = alloc(&mut tracker, 100);
        let b = alloc(&mut tracker, 100);
        let _c = alloc(&mut tracker, 100);

        tracker.free(a).unwrap();
        tracker.free(b).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 200)]);
        assert_eq!(tracker.used_blocks(), vec![Range::new(200, 100)]);
    }

    #[test]
    fn free_with_only_right_free_neighbour() {
        let mut tracker = BlockAllocator::new(300);
        let _a = alloc(&mut tracker, 100);
        let b = alloc(&mut tracker, 100);
        let c = alloc(&mut tracker, 100);

        tracker.free(c).unwrap();
        tracker.free(b).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(100, 200)]);

        // The merged block is the new tail, so expanding extends it.
        tracker.expand(400).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(100, 300)]);
    }

    #[test]
    fn free_tail_with_left_free_updates_rightmost() {
        let mut tracker = BlockAllocator::new(200);
        let a = alloc(&mut tracker, 100);
        let b = alloc(&mut tracker, 100);

        tracker.free(a).unwrap();
        tracker.free(b).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 200)]);

        tracker.expand(250).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 250)]);
    }

    #[test]
    fn free_without_free_neighbours() {
        let (mut tracker, handles) = filled_500();
        tracker.free(handles[2]).unwrap();
        assert_eq!(tracker.free_blocks(), vec![Range::new(200, 100)]);
        assert!(tracker.has_allocations());
    }

    #[test]
    fn freeing_everything_leaves_one_block() {
        let (mut tracker, handles) = filled_500();
        for &i in &[4, 0, 2, 1, 3] {
            tracker.free(handles[i]).unwrap();
        }
        assert_eq!(tracker.free_blocks(), vec![Range::new(0, 500)]);
        assert!(!tracker.has_allocations());
        assert_eq!(tracker.stats().bins, 1);
    }

    #[test]
    fn double_free_is_detected() {
        let (mut tracker, handles) = filled_500();

        // Neither neighbour is free, so the block survives as a free block.
        tracker.free(handles[2]).unwrap();
        assert_eq!(
            tracker.free(handles[2]),
            Err(ContractViolation::AlreadyFree { handle: handles[2] })
        );

        // Merged into its left neighbour, so the record is recycled.
        tracker.free(handles[3]).unwrap();
        assert_eq!(
            tracker.free(handles[3]),
            Err(ContractViolation::StaleHandle { handle: handles[3] })
        );
    }

    #[test]
    fn stale_handle_after_reuse_is_detected() {
        let mut tracker = BlockAllocator::new(100);
        let a = alloc(&mut tracker, 100);
        tracker.free(a).unwrap();

        let b = alloc(&mut tracker, 100);
        assert_eq!(a.index(), b.index());
        assert!(!tracker.is_valid(a));
        assert!(tracker.is_valid(b));
        assert_eq!(
            tracker.free(a),
            Err(ContractViolation::StaleHandle { handle: a })
        );
        assert_eq!(tracker.range(b), Ok(Range::new(0, 100)));
    }

    #[test]
    fn foreign_handle_is_detected() {
        let mut big = BlockAllocator::new(1000);
        let mut small = BlockAllocator::new(10);
        for _ in 0..5 {
            let _ = alloc(&mut big, 10);
        }
        let h = alloc(&mut big, 10);

        assert_eq!(
            small.free(h),
            Err(ContractViolation::ForeignHandle { handle: h })
        );
    }

    #[test]
    fn allocate_then_free_restores_layout() {
        let mut tracker = BlockAllocator::new(1000);
        let a = alloc(&mut tracker, 100);
        let _b = alloc(&mut tracker, 200);
        tracker.free(a).unwrap();
        let before = tracker.free_blocks();

        for size in [1, 50, 100, 101, 700] {
            let h = alloc(&mut tracker, size);
            tracker.free(h).unwrap();
            assert_eq!(tracker.free_blocks(), before);
        }
    }

    #[test]
    fn allocate_or_grow_expands_when_full() {
        let config = AllocatorConfig::new(100).with_growth(GrowthPolicy::new(2, 1));
        let mut tracker = BlockAllocator::with_config(config);

        let a = tracker.allocate_or_grow(80).unwrap();
        assert_eq!(tracker.capacity(), 100);
        assert_eq!(pos_of(&tracker, a), 0);

        // 20 units are free at the tail; growth doubles the capacity.
        let b = tracker.allocate_or_grow(50).unwrap();
        assert_eq!(tracker.capacity(), 200);
        assert_eq!(pos_of(&tracker, b), 80);

        // A request larger than a doubling forces an exact fit.
        let c = tracker.allocate_or_grow(1000).unwrap();
        assert_eq!(pos_of(&tracker, c), 130);
        assert_eq!(tracker.capacity(), 1130);
        assert!(tracker.free_blocks().is_empty());
    }

    #[test]
    fn allocate_or_grow_from_empty() {
        let mut tracker = BlockAllocator::default();
        let h = tracker.allocate_or_grow(10).unwrap();
        assert_eq!(tracker.range(h), Ok(Range::new(0, 10)));
        assert_eq!(tracker.capacity(), GrowthPolicy::DEFAULT_MIN_INCREMENT);

        assert_eq!(
            tracker.allocate_or_grow(0),
            Err(ContractViolation::ZeroSizeAllocation)
        );
    }

    #[test]
    fn stats_summarize_chain() {
        let mut tracker = BlockAllocator::new(1000);
        let a = alloc(&mut tracker, 100);
        let _b = alloc(&mut tracker, 100);
        tracker.free(a).unwrap();

        let stats = tracker.stats();
        assert_eq!(
            stats,
            AllocatorStats {
                capacity: 1000,
                free_units: 900,
                used_units: 100,
                free_blocks: 2,
                used_blocks: 1,
                bins: 2,
                largest_free: 800,
                recycled_records: 0,
            }
        );
        assert!((stats.fragmentation() - (1.0 - 800.0 / 900.0)).abs() < 1e-12);

        assert_eq!(BlockAllocator::new(0).stats().fragmentation(), 0.0);
    }

    #[test]
    fn verify_detects_corruption() {
        let mut tracker = BlockAllocator::new(100);
        let _a = alloc(&mut tracker, 40);
        assert_eq!(tracker.verify(), Ok(()));

        let leftmost = tracker.leftmost.unwrap();
        tracker.arena.get_mut(leftmost).size = 30;
        assert_eq!(
            tracker.verify(),
            Err(InvariantViolation::Discontiguous {
                left: Range::new(0, 30),
                right: Range::new(40, 60),
            })
        );
    }

    #[test]
    fn verify_detects_unlinked_free_block() {
        let mut tracker = BlockAllocator::new(100);
        let rightmost = tracker.rightmost.unwrap();
        tracker.bins.unlink(&mut tracker.arena, rightmost);

        assert_eq!(
            tracker.verify(),
            Err(InvariantViolation::MissingFromBin {
                block: Range::new(0, 100),
            })
        );
    }

    #[test]
    fn debug_output_is_compact() {
        let tracker = BlockAllocator::new(64);
        let s = std::format!("{tracker:?}");
        assert!(s.starts_with("BlockAllocator"));
        assert!(s.contains("capacity: 64"));
    }
}
