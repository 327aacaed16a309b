//! Size-indexed lookup of free blocks.
//!
//! Free blocks are grouped into bins by exact size. Each bin is an intrusive
//! doubly linked list threaded through the blocks' `prev_of_same_size` and
//! `next_of_same_size` fields, and the bins themselves are kept in a vector of
//! list heads sorted by ascending size. Finding the best fit for a request is
//! then a lower-bound binary search over the heads.
//!
//! Inserting a bin for a size that is not yet tracked shifts the tail of the
//! vector. This is cheap as long as the number of distinct free sizes stays
//! small relative to the number of blocks, which holds for the buffer
//! workloads this crate targets.

use alloc::vec::Vec;

use crate::block::{BlockArena, BlockId};

#[derive(Debug, Default)]
pub(crate) struct SizeBins {
    /// Heads of the per-size lists, strictly ascending by block size.
    heads: Vec<BlockId>,
}

impl SizeBins {
    pub fn new() -> SizeBins {
        SizeBins::default()
    }

    /// Number of distinct free block sizes.
    #[inline]
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Returns the list heads in ascending size order.
    #[inline]
    pub fn heads(&self) -> &[BlockId] {
        &self.heads
    }

    /// Returns the index of the first bin whose size is at least `size`.
    ///
    /// The result equals `self.len()` if every bin is smaller.
    #[inline]
    pub fn find_first_larger_or_equal(&self, arena: &BlockArena, size: usize) -> usize {
        self.heads
            .partition_point(|&head| arena.get(head).size < size)
    }

    /// Returns the size of the largest free block, or zero.
    #[inline]
    pub fn largest(&self, arena: &BlockArena) -> usize {
        self.heads.last().map_or(0, |&head| arena.get(head).size)
    }

    /// Pushes a free block onto the bin for its size.
    pub fn link(&mut self, arena: &mut BlockArena, block: BlockId) {
        let size = {
            let b = arena.get(block);
            debug_assert!(b.is_free());
            debug_assert!(b.size > 0);
            debug_assert!(b.prev_of_same_size.is_none());
            debug_assert!(b.next_of_same_size.is_none());
            b.size
        };

        let bin = self.find_first_larger_or_equal(arena, size);

        match self.heads.get(bin).copied() {
            Some(old_head) if arena.get(old_head).size == size => {
                debug_assert!(arena.get(old_head).prev_of_same_size.is_none());

                // `block` points forward to `old_head`, which points back.
                arena.get_mut(block).next_of_same_size = Some(old_head);
                arena.get_mut(old_head).prev_of_same_size = Some(block);
                self.heads[bin] = block;
            }

            // No bin of this size yet; also covers inserting past the end.
            _ => self.heads.insert(bin, block),
        }
    }

    /// Removes a free block from its bin, pruning the bin if it empties.
    pub fn unlink(&mut self, arena: &mut BlockArena, block: BlockId) {
        let (size, prev, next) = {
            let b = arena.get(block);
            debug_assert!(b.is_free());
            (b.size, b.prev_of_same_size, b.next_of_same_size)
        };

        match prev {
            // Link `prev` forward to `next`.
            Some(p) => {
                debug_assert_eq!(arena.get(p).size, size);
                arena.get_mut(p).next_of_same_size = next;
                if let Some(n) = next {
                    arena.get_mut(n).prev_of_same_size = Some(p);
                }
            }

            // No previous block, so `block` is the head of its bin.
            None => {
                let bin = self.find_first_larger_or_equal(arena, size);
                debug_assert_eq!(self.heads.get(bin), Some(&block));
                self.replace_head(arena, bin, next);
            }
        }

        let b = arena.get_mut(block);
        b.prev_of_same_size = None;
        b.next_of_same_size = None;
    }

    /// Detaches and returns the head of bin `bin`.
    ///
    /// This is `unlink` for a block already located by
    /// `find_first_larger_or_equal`, sparing a second binary search.
    pub fn pop_at(&mut self, arena: &mut BlockArena, bin: usize) -> BlockId {
        let head = self.heads[bin];
        debug_assert!(arena.get(head).prev_of_same_size.is_none());

        let next = arena.get_mut(head).next_of_same_size.take();
        self.replace_head(arena, bin, next);

        head
    }

    fn replace_head(&mut self, arena: &mut BlockArena, bin: usize, next: Option<BlockId>) {
        match next {
            Some(n) => {
                arena.get_mut(n).prev_of_same_size = None;
                self.heads[bin] = n;
            }

            // Empty bins must not linger, or the lower-bound search would
            // return a head whose size no longer matches the bin.
            None => {
                self.heads.remove(bin);
            }
        }
    }
}
