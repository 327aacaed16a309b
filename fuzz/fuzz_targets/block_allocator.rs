#![no_main]
use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use vbo_alloc::{BlockAllocator, ContractViolation};

const MAX_CAPACITY: usize = 1 << 20;
const MAX_SIZE: usize = 1 << 16;

#[derive(Clone, Debug)]
enum TrackerOp {
    Allocate(usize),
    Free(usize),
}

impl Arbitrary<'_> for TrackerOp {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<TrackerOp> {
        let op = if bool::arbitrary(un)? {
            TrackerOp::Allocate(usize::arbitrary(un)? % MAX_SIZE)
        } else {
            TrackerOp::Free(usize::arbitrary(un)?)
        };

        Ok(op)
    }
}

#[derive(Clone, Debug)]
struct Args {
    capacity: usize,
    ops: Vec<TrackerOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let capacity = usize::arbitrary(un)? % MAX_CAPACITY;
        let ops = Vec::arbitrary(un)?;

        Ok(Args { capacity, ops })
    }
}

fuzz_target!(|args: Args| {
    let Args { capacity, ops } = args;

    let mut tracker = BlockAllocator::new(capacity);
    let mut outstanding = Vec::new();

    for op in ops {
        match op {
            TrackerOp::Allocate(size) => match tracker.allocate(size) {
                Ok(Some(handle)) => outstanding.push(handle),
                Ok(None) => assert!(size > tracker.largest_possible_allocation()),
                Err(e) => assert_eq!((size, e), (0, ContractViolation::ZeroSizeAllocation)),
            },

            TrackerOp::Free(raw_idx) => {
                if outstanding.is_empty() {
                    continue;
                }

                let idx = raw_idx % outstanding.len();
                let handle = outstanding.swap_remove(idx);
                tracker.free(handle).unwrap();
            }
        }

        tracker.verify().unwrap();
    }

    for handle in outstanding {
        tracker.free(handle).unwrap();
    }

    assert!(!tracker.has_allocations());
    tracker.verify().unwrap();
});
