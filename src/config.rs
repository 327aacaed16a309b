//! Allocator configuration.

use crate::error::ContractViolation;

/// Configuration for a [`BlockAllocator`].
///
/// [`BlockAllocator`]: crate::BlockAllocator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Capacity of the allocator at construction. May be zero.
    pub initial_capacity: usize,

    /// How [`BlockAllocator::allocate_or_grow`] expands the capacity when
    /// a request does not fit.
    ///
    /// [`BlockAllocator::allocate_or_grow`]: crate::BlockAllocator::allocate_or_grow
    pub growth: GrowthPolicy,
}

impl AllocatorConfig {
    /// Default initial capacity.
    pub const DEFAULT_INITIAL_CAPACITY: usize = 0;

    /// Creates a config with the given initial capacity and the default growth
    /// policy.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            growth: GrowthPolicy::default(),
        }
    }

    /// Replaces the growth policy.
    pub fn with_growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL_CAPACITY)
    }
}

/// Geometric capacity growth.
///
/// Each growth step multiplies the capacity by `factor`, adds at least
/// `min_increment` units, and always adds enough to satisfy the request that
/// triggered it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Multiplier applied to the current capacity. Values below 1 are treated
    /// as 1.
    pub factor: usize,

    /// Lower bound on the number of units added per step. Values below 1 are
    /// treated as 1.
    pub min_increment: usize,
}

impl GrowthPolicy {
    /// Default multiplier: capacity doubles on each step.
    pub const DEFAULT_FACTOR: usize = 2;

    /// Default minimum increment.
    pub const DEFAULT_MIN_INCREMENT: usize = 1024;

    /// Creates a growth policy.
    pub const fn new(factor: usize, min_increment: usize) -> Self {
        Self {
            factor,
            min_increment,
        }
    }

    /// Returns the capacity to expand to so that a request of `needed` units
    /// fits.
    ///
    /// `trailing_free` is the size of the free block at the end of the
    /// buffer, if any; expanding grows that block in place, so only the
    /// remainder has to be added.
    ///
    /// # Errors
    ///
    /// Returns [`ContractViolation::CapacityOverflow`] if the required
    /// capacity does not fit in a `usize`.
    pub fn next_capacity(
        &self,
        capacity: usize,
        trailing_free: usize,
        needed: usize,
    ) -> Result<usize, ContractViolation> {
        let shortfall = needed.saturating_sub(trailing_free);
        let required =
            capacity
                .checked_add(shortfall)
                .ok_or(ContractViolation::CapacityOverflow {
                    capacity,
                    additional: shortfall,
                })?;

        // Geometric steps may saturate; the required capacity never does.
        let scaled = capacity.saturating_mul(self.factor.max(1));
        let stepped = capacity.saturating_add(self.min_increment.max(1));

        Ok(required.max(scaled).max(stepped))
    }
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FACTOR, Self::DEFAULT_MIN_INCREMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_starts_empty() {
        let config = AllocatorConfig::default();
        assert_eq!(config.initial_capacity, 0);
        assert_eq!(config.growth, GrowthPolicy::default());
    }

    #[test]
    fn doubles_when_request_is_small() {
        let policy = GrowthPolicy::new(2, 16);
        assert_eq!(policy.next_capacity(1000, 0, 10), Ok(2000));
    }

    #[test]
    fn min_increment_applies_to_small_buffers() {
        let policy = GrowthPolicy::new(2, 1024);
        assert_eq!(policy.next_capacity(0, 0, 1), Ok(1024));
        assert_eq!(policy.next_capacity(100, 0, 1), Ok(1124));
    }

    #[test]
    fn large_request_overrides_geometric_step() {
        let policy = GrowthPolicy::new(2, 16);
        assert_eq!(policy.next_capacity(100, 0, 1000), Ok(1100));
    }

    #[test]
    fn trailing_free_block_reduces_requirement() {
        let policy = GrowthPolicy::new(1, 1);
        // 40 units are already free at the tail; only 60 more are needed.
        assert_eq!(policy.next_capacity(200, 40, 100), Ok(260));
    }

    #[test]
    fn degenerate_policy_still_grows() {
        let policy = GrowthPolicy::new(0, 0);
        assert_eq!(policy.next_capacity(10, 10, 5), Ok(11));
    }

    #[test]
    fn overflow_is_reported() {
        let policy = GrowthPolicy::default();
        assert_eq!(
            policy.next_capacity(usize::MAX - 1, 0, 10),
            Err(ContractViolation::CapacityOverflow {
                capacity: usize::MAX - 1,
                additional: 10,
            })
        );
    }

    #[test]
    fn saturating_step_still_satisfies_request() {
        let policy = GrowthPolicy::new(4, 1);
        let cap = usize::MAX / 2;
        assert_eq!(policy.next_capacity(cap, 0, 1), Ok(usize::MAX));
    }
}
