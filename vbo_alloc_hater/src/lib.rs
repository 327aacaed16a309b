use alloc_hater::{Region, Subject};
use vbo_alloc::{AllocatorConfig, BlockAllocator, ContractViolation, GrowthPolicy, Handle, Range};

pub struct BlockAllocatorSubject(BlockAllocator);

impl BlockAllocatorSubject {
    pub fn new(initial_capacity: usize) -> Self {
        BlockAllocatorSubject(BlockAllocator::new(initial_capacity))
    }

    pub fn with_growth(initial_capacity: usize, growth: GrowthPolicy) -> Self {
        let config = AllocatorConfig::new(initial_capacity).with_growth(growth);
        BlockAllocatorSubject(BlockAllocator::with_config(config))
    }

    pub fn tracker(&self) -> &BlockAllocator {
        &self.0
    }
}

fn region(r: Range) -> Region {
    Region::new(r.pos, r.size)
}

impl Subject for BlockAllocatorSubject {
    type Handle = Handle;
    type Error = ContractViolation;

    fn capacity(&self) -> usize {
        self.0.capacity()
    }

    fn allocate(&mut self, size: usize) -> Result<Option<(Handle, Region)>, ContractViolation> {
        let Some(handle) = self.0.allocate(size)? else {
            return Ok(None);
        };

        let r = self.0.range(handle)?;
        Ok(Some((handle, region(r))))
    }

    fn allocate_or_grow(&mut self, size: usize) -> Result<(Handle, Region), ContractViolation> {
        let handle = self.0.allocate_or_grow(size)?;
        let r = self.0.range(handle)?;
        Ok((handle, region(r)))
    }

    fn free(&mut self, handle: Handle) -> Result<Region, ContractViolation> {
        let freed = self.0.free(handle)?;

        // A freed handle must not be accepted again.
        match self.0.free(handle) {
            Err(ContractViolation::AlreadyFree { .. } | ContractViolation::StaleHandle { .. }) => {
                Ok(region(freed))
            }
            Ok(_) => panic!("double free of {handle} was accepted"),
            Err(e) => Err(e),
        }
    }

    fn expand(&mut self, new_capacity: usize) -> Result<(), ContractViolation> {
        self.0.expand(new_capacity)
    }

    fn check(&self) -> Result<(), String> {
        self.0.verify().map_err(|e| e.to_string())?;

        let stats = self.0.stats();
        if stats.free_units + stats.used_units != stats.capacity {
            return Err(format!("stats do not add up: {stats:?}"));
        }

        if self.0.largest_possible_allocation() != stats.largest_free {
            return Err(format!(
                "largest_possible_allocation() = {} but stats report {}",
                self.0.largest_possible_allocation(),
                stats.largest_free
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc_hater::{Evaluator, TrackerOp};

    use super::*;

    #[test]
    fn survives_mixed_workload() {
        let mut eval = Evaluator::new(BlockAllocatorSubject::new(256));
        eval.evaluate([
            TrackerOp::Allocate(64),
            TrackerOp::Allocate(64),
            TrackerOp::Allocate(64),
            TrackerOp::Free(1),
            TrackerOp::Allocate(0),
            TrackerOp::Allocate(32),
            TrackerOp::Expand(0),
            TrackerOp::AllocateOrGrow(500),
            TrackerOp::Free(0),
            TrackerOp::Expand(100),
            TrackerOp::Allocate(300),
        ])
        .unwrap();

        let subject = eval.into_subject();
        assert!(!subject.tracker().has_allocations());
    }
}
