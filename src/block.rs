//! Block records and the arena that owns them.
//!
//! Every block lives in a single `Vec`, and all links between blocks are
//! indices into that vector. Records that are merged away are pushed onto a
//! recycle stack and handed out again by [`BlockArena::obtain`], so the arena
//! only grows when the physical chain reaches a new maximum length.

use alloc::vec::Vec;

use crate::Range;

/// The index of a block record within a [`BlockArena`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct BlockId(u32);

impl BlockId {
    #[inline]
    pub(crate) fn new(index: usize) -> BlockId {
        BlockId(u32::try_from(index).expect("block arena exceeded u32::MAX records"))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free,
    Used,
    /// On the recycle stack; not part of the physical chain.
    Recycled,
}

/// A contiguous region of the tracked buffer.
#[derive(Clone, Debug)]
pub(crate) struct Block {
    pub pos: usize,
    pub size: usize,
    pub state: BlockState,

    // Physical neighbours.
    pub left: Option<BlockId>,
    pub right: Option<BlockId>,

    // Links within the size bin; both `None` unless the block is free.
    pub prev_of_same_size: Option<BlockId>,
    pub next_of_same_size: Option<BlockId>,

    /// Bumped each time a handle to this record is issued and each time the
    /// record is recycled.
    pub generation: u32,
}

impl Block {
    fn recycled() -> Block {
        Block {
            pos: 0,
            size: 0,
            state: BlockState::Recycled,
            left: None,
            right: None,
            prev_of_same_size: None,
            next_of_same_size: None,
            generation: 0,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.state == BlockState::Used
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.pos + self.size
    }

    #[inline]
    pub fn range(&self) -> Range {
        Range::new(self.pos, self.size)
    }
}

/// Owner of every block record.
#[derive(Debug, Default)]
pub(crate) struct BlockArena {
    blocks: Vec<Block>,
    recycled: Vec<BlockId>,
}

impl BlockArena {
    pub fn new() -> BlockArena {
        BlockArena::default()
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Returns the record at `index`, if the arena has ever created one.
    #[inline]
    pub fn try_get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Total number of records, including recycled ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn recycled_len(&self) -> usize {
        self.recycled.len()
    }

    /// Obtains a record, reusing a recycled one if possible.
    ///
    /// The returned record is detached: it has no links and its state is
    /// `state`.
    pub fn obtain(&mut self, pos: usize, size: usize, state: BlockState) -> BlockId {
        let id = match self.recycled.pop() {
            Some(id) => id,
            None => {
                let id = BlockId::new(self.blocks.len());
                self.blocks.push(Block::recycled());
                id
            }
        };

        let block = self.get_mut(id);
        debug_assert_eq!(block.state, BlockState::Recycled);
        block.pos = pos;
        block.size = size;
        block.state = state;
        block.left = None;
        block.right = None;
        block.prev_of_same_size = None;
        block.next_of_same_size = None;

        id
    }

    /// Retires a record that has already been spliced out of the chain.
    ///
    /// The generation is bumped so that handles to the retired block stay
    /// stale after the record is reused.
    pub fn recycle(&mut self, id: BlockId) {
        let block = self.get_mut(id);
        debug_assert!(block.prev_of_same_size.is_none() && block.next_of_same_size.is_none());
        block.generation = block.generation.wrapping_add(1);
        block.state = BlockState::Recycled;
        block.left = None;
        block.right = None;
        self.recycled.push(id);
    }

    /// Links `new` into the physical chain immediately before `at`.
    ///
    /// Returns `true` if `new` became the leftmost block.
    pub fn insert_left_of(&mut self, at: BlockId, new: BlockId) -> bool {
        let old_left = self.get(at).left;

        {
            let n = self.get_mut(new);
            n.left = old_left;
            n.right = Some(at);
        }
        self.get_mut(at).left = Some(new);

        match old_left {
            Some(l) => {
                self.get_mut(l).right = Some(new);
                false
            }
            None => true,
        }
    }

    /// Links `new` into the physical chain immediately after `at`.
    pub fn insert_right_of(&mut self, at: BlockId, new: BlockId) {
        let old_right = self.get(at).right;

        {
            let n = self.get_mut(new);
            n.left = Some(at);
            n.right = old_right;
        }
        self.get_mut(at).right = Some(new);

        if let Some(r) = old_right {
            self.get_mut(r).left = Some(new);
        }
    }

    /// Removes the right neighbour of `keep` from the chain and returns it.
    ///
    /// The removed record keeps its stale links; callers recycle it.
    pub fn unlink_right_of(&mut self, keep: BlockId) -> BlockId {
        let removed = self
            .get(keep)
            .right
            .expect("unlink_right_of: block has no right neighbour");
        let new_right = self.get(removed).right;

        self.get_mut(keep).right = new_right;
        if let Some(r) = new_right {
            self.get_mut(r).left = Some(keep);
        }

        removed
    }

    /// Bumps the generation of `id` and returns the new value.
    pub fn next_generation(&mut self, id: BlockId) -> u32 {
        let block = self.get_mut(id);
        block.generation = block.generation.wrapping_add(1);
        block.generation
    }

    /// Iterates over the physical chain starting at `leftmost`.
    pub fn chain(&self, leftmost: Option<BlockId>) -> Chain<'_> {
        Chain {
            arena: self,
            next: leftmost,
        }
    }
}

/// Iterator over the physical chain, yielding blocks in address order.
pub(crate) struct Chain<'a> {
    arena: &'a BlockArena,
    next: Option<BlockId>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let block = self.arena.get(id);
        self.next = block.right;
        Some((id, block))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;

    use super::*;

    fn positions(arena: &BlockArena, leftmost: BlockId) -> Vec<usize> {
        arena.chain(Some(leftmost)).map(|(_, b)| b.pos).collect()
    }

    #[test]
    fn obtain_reuses_recycled_records() {
        let mut arena = BlockArena::new();
        let a = arena.obtain(0, 10, BlockState::Free);
        let b = arena.obtain(10, 10, BlockState::Free);
        assert_eq!(arena.len(), 2);

        arena.recycle(b);
        assert_eq!(arena.recycled_len(), 1);

        let c = arena.obtain(10, 5, BlockState::Used);
        assert_eq!(c, b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.recycled_len(), 0);
        assert!(arena.get(c).is_used());
        assert_ne!(a, c);
    }

    #[test]
    fn recycling_advances_generation() {
        let mut arena = BlockArena::new();
        let a = arena.obtain(0, 10, BlockState::Used);
        assert_eq!(arena.next_generation(a), 1);
        arena.recycle(a);

        let b = arena.obtain(0, 10, BlockState::Free);
        assert_eq!(a, b);
        assert_eq!(arena.get(b).generation, 2);
        assert_eq!(arena.next_generation(b), 3);
    }

    #[test]
    fn insert_and_unlink_keep_chain_consistent() {
        let mut arena = BlockArena::new();
        let mid = arena.obtain(10, 10, BlockState::Free);

        let first = arena.obtain(0, 10, BlockState::Used);
        assert!(arena.insert_left_of(mid, first));

        let last = arena.obtain(20, 10, BlockState::Used);
        arena.insert_right_of(mid, last);

        assert_eq!(positions(&arena, first), vec![0, 10, 20]);
        assert_eq!(arena.get(last).left, Some(mid));

        let removed = arena.unlink_right_of(first);
        assert_eq!(removed, mid);
        assert_eq!(positions(&arena, first), vec![0, 20]);
        assert_eq!(arena.get(last).left, Some(first));
    }

    #[test]
    fn insert_left_of_middle_block_is_not_leftmost() {
        let mut arena = BlockArena::new();
        let a = arena.obtain(0, 10, BlockState::Used);
        let b = arena.obtain(20, 10, BlockState::Free);
        arena.insert_right_of(a, b);

        let c = arena.obtain(10, 10, BlockState::Used);
        assert!(!arena.insert_left_of(b, c));
        assert_eq!(positions(&arena, a), vec![0, 10, 20]);
    }
}
