#![no_main]
use alloc_hater::TrackerOp;
use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use vbo_alloc::GrowthPolicy;
use vbo_alloc_hater::BlockAllocatorSubject;

const MAX_CAPACITY: usize = 1 << 20;
const MAX_FACTOR: usize = 4;

#[derive(Clone, Debug)]
struct Args {
    capacity: usize,
    growth: GrowthPolicy,
    ops: Vec<TrackerOp>,
}

impl Arbitrary<'_> for Args {
    fn arbitrary(un: &mut Unstructured) -> arbitrary::Result<Args> {
        let capacity = usize::arbitrary(un)? % MAX_CAPACITY;
        let factor = usize::arbitrary(un)? % MAX_FACTOR;
        let min_increment = usize::arbitrary(un)? % alloc_hater::MAX_REQUEST;
        let ops = Vec::arbitrary(un)?;

        Ok(Args {
            capacity,
            growth: GrowthPolicy::new(factor, min_increment),
            ops,
        })
    }
}

fuzz_target!(|args: Args| {
    let Args {
        capacity,
        growth,
        ops,
    } = args;

    let subject = BlockAllocatorSubject::with_growth(capacity, growth);

    let mut eval = alloc_hater::Evaluator::new(subject);
    eval.evaluate(ops).unwrap();
});
