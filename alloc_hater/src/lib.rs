//! A small library for ~~hating on~~ evaluating the correctness of offset
//! suballocators.
//!
//! A [`Subject`] hands out regions of an abstract, growable address space. The
//! [`Evaluator`] drives it with a sequence of [`TrackerOp`]s and keeps its own
//! record of which operation owns every outstanding region, failing as soon as
//! the subject hands out overlapping or out-of-bounds regions or reports a
//! different region on free than it did on allocation.

use std::{collections::BTreeMap, fmt};

use arbitrary::{Arbitrary, Unstructured};

/// Upper bound (exclusive) on generated request and growth sizes.
pub const MAX_REQUEST: usize = 1 << 16;

/// A region `[offset, offset + size)` of a subject's address space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub offset: usize,
    pub size: usize,
}

impl Region {
    pub fn new(offset: usize, size: usize) -> Region {
        Region { offset, size }
    }

    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.offset, self.end())
    }
}

#[derive(Arbitrary)]
enum TrackerOpTag {
    Allocate,
    AllocateOrGrow,
    Free,
    Expand,
}

#[derive(Clone, Debug)]
pub enum TrackerOp {
    /// Allocate a region of the given size, failing if nothing fits.
    Allocate(usize),
    /// Allocate a region of the given size, growing if nothing fits.
    AllocateOrGrow(usize),
    /// Free an outstanding region.
    ///
    /// Given `n` outstanding regions, the region to free is at index
    /// `index % n`.
    Free(usize),
    /// Grow the capacity by the given number of units.
    Expand(usize),
}

impl Arbitrary<'_> for TrackerOp {
    fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = TrackerOpTag::arbitrary(u)?;

        let op = match tag {
            TrackerOpTag::Allocate => TrackerOp::Allocate(usize::arbitrary(u)? % MAX_REQUEST),
            TrackerOpTag::AllocateOrGrow => {
                TrackerOp::AllocateOrGrow(usize::arbitrary(u)? % MAX_REQUEST)
            }
            TrackerOpTag::Free => TrackerOp::Free(usize::arbitrary(u)?),
            TrackerOpTag::Expand => TrackerOp::Expand(usize::arbitrary(u)? % MAX_REQUEST),
        };

        Ok(op)
    }
}

pub trait Subject {
    type Handle: Copy + fmt::Debug;
    type Error: fmt::Debug;

    /// Returns the size of the address space.
    fn capacity(&self) -> usize;

    /// Allocates a region of `size` units.
    ///
    /// Returns `Ok(None)` if no region is available. A request for zero units
    /// must be rejected with an error.
    fn allocate(&mut self, size: usize) -> Result<Option<(Self::Handle, Region)>, Self::Error>;

    /// Allocates a region of `size` units, growing the address space if
    /// needed.
    fn allocate_or_grow(&mut self, size: usize) -> Result<(Self::Handle, Region), Self::Error>;

    /// Frees the region referred to by `handle`, returning it.
    fn free(&mut self, handle: Self::Handle) -> Result<Region, Self::Error>;

    /// Grows the address space to `new_capacity` units.
    ///
    /// Requests that do not grow the address space must be rejected with an
    /// error.
    fn expand(&mut self, new_capacity: usize) -> Result<(), Self::Error>;

    /// Checks the subject's internal consistency.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The reason an evaluation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// A region extends past the end of the address space.
    OutOfBounds { region: Region, capacity: usize },
    /// A region overlaps one owned by an earlier operation.
    Overlap { region: Region, owner: u64 },
    /// A region has a different size than was requested.
    WrongSize { requested: usize, region: Region },
    /// A freed region differs from the one that was allocated.
    FreeMismatch { allocated: Region, freed: Region },
    /// A request that must be rejected was accepted.
    Accepted,
    /// A request that must succeed failed.
    Error(String),
    /// The address space did not grow as requested.
    CapacityMismatch { expected: usize, actual: usize },
    /// The subject's own consistency check failed.
    Inconsistent(String),
}

/// Which operation owns each outstanding region, keyed by offset.
#[derive(Debug, Default)]
pub struct Ownership {
    regions: BTreeMap<usize, (Region, u64)>,
}

impl Ownership {
    pub fn new() -> Ownership {
        Ownership::default()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Records that operation `id` owns `region`.
    pub fn claim(&mut self, region: Region, id: u64) -> Result<(), Reason> {
        // Only the nearest region on either side can overlap.
        let before = self.regions.range(..=region.offset).next_back();
        let after = self.regions.range(region.offset..).next();

        for (_, (other, owner)) in before.into_iter().chain(after) {
            if other.offset < region.end() && region.offset < other.end() {
                return Err(Reason::Overlap {
                    region,
                    owner: *owner,
                });
            }
        }

        self.regions.insert(region.offset, (region, id));
        Ok(())
    }

    /// Releases `region`, which must have been claimed exactly.
    pub fn release(&mut self, allocated: Region, freed: Region) -> Result<(), Reason> {
        if allocated != freed {
            return Err(Reason::FreeMismatch { allocated, freed });
        }

        match self.regions.remove(&allocated.offset) {
            Some((r, _)) if r == allocated => Ok(()),
            _ => Err(Reason::FreeMismatch { allocated, freed }),
        }
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<TrackerOp>,
    /// The failing operation, or `None` if the failure was found while
    /// freeing the regions still outstanding at the end.
    pub failed_op: Option<TrackerOp>,
    pub reason: Reason,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = TrackerOp>,
    {
        let mut completed = Vec::new();
        let mut ownership = Ownership::new();
        let mut outstanding: Vec<(S::Handle, Region)> = Vec::new();

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id as u64;

            if let Err(reason) = self.apply(&op, op_id, &mut ownership, &mut outstanding) {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                    reason,
                });
            }

            completed.push(op);
        }

        for (handle, allocated) in outstanding {
            let res = match self.subject.free(handle) {
                Ok(freed) => ownership.release(allocated, freed),
                Err(e) => Err(Reason::Error(format!("{e:?}"))),
            };

            if let Err(reason) = res.and_then(|()| self.check()) {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    reason,
                });
            }
        }

        Ok(())
    }

    fn apply(
        &mut self,
        op: &TrackerOp,
        op_id: u64,
        ownership: &mut Ownership,
        outstanding: &mut Vec<(S::Handle, Region)>,
    ) -> Result<(), Reason> {
        match *op {
            TrackerOp::Allocate(0) | TrackerOp::AllocateOrGrow(0) => {
                let accepted = match *op {
                    TrackerOp::Allocate(_) => self.subject.allocate(0).is_ok(),
                    _ => self.subject.allocate_or_grow(0).is_ok(),
                };

                if accepted {
                    return Err(Reason::Accepted);
                }
            }

            TrackerOp::Allocate(size) => match self.subject.allocate(size) {
                Ok(Some((handle, region))) => {
                    self.admit(size, region, op_id, ownership)?;
                    outstanding.push((handle, region));
                }
                Ok(None) => (),
                Err(e) => return Err(Reason::Error(format!("{e:?}"))),
            },

            TrackerOp::AllocateOrGrow(size) => match self.subject.allocate_or_grow(size) {
                Ok((handle, region)) => {
                    self.admit(size, region, op_id, ownership)?;
                    outstanding.push((handle, region));
                }
                Err(e) => return Err(Reason::Error(format!("{e:?}"))),
            },

            TrackerOp::Free(raw_idx) => {
                if outstanding.is_empty() {
                    return Ok(());
                }

                let (handle, allocated) = outstanding.swap_remove(raw_idx % outstanding.len());
                match self.subject.free(handle) {
                    Ok(freed) => ownership.release(allocated, freed)?,
                    Err(e) => return Err(Reason::Error(format!("{e:?}"))),
                }
            }

            TrackerOp::Expand(additional) => {
                let capacity = self.subject.capacity();
                let expected = capacity + additional;
                let res = self.subject.expand(expected);

                match (additional, res) {
                    (0, Ok(())) => return Err(Reason::Accepted),
                    (0, Err(_)) => (),
                    (_, Err(e)) => return Err(Reason::Error(format!("{e:?}"))),
                    (_, Ok(())) => {
                        let actual = self.subject.capacity();
                        if actual != expected {
                            return Err(Reason::CapacityMismatch { expected, actual });
                        }
                    }
                }
            }
        }

        self.check()
    }

    fn admit(
        &self,
        requested: usize,
        region: Region,
        op_id: u64,
        ownership: &mut Ownership,
    ) -> Result<(), Reason> {
        if region.size != requested {
            return Err(Reason::WrongSize { requested, region });
        }

        let capacity = self.subject.capacity();
        if region.end() > capacity {
            return Err(Reason::OutOfBounds { region, capacity });
        }

        ownership.claim(region, op_id)
    }

    fn check(&self) -> Result<(), Reason> {
        self.subject.check().map_err(Reason::Inconsistent)
    }
}
