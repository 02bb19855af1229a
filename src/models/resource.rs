//! Compute resource arithmetic
//!
//! The original's `ComputeResource` overloaded Python dunder methods so
//! `FractionalDemand`, `IntegralDemand` and `ResourceSupply` could all share
//! one implementation while staying distinct types for `isinstance` checks
//! elsewhere. Rust has no dynamic `isinstance`, so each variant is its own
//! newtype wrapping a shared [`Resources`] with the same saturating
//! arithmetic, and call sites that cared about the distinction (demand
//! selection, job validation) just take the concrete type they need.
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A bundle of cpu/gpu/memory quantities
///
/// All arithmetic saturates at zero, matching the original's `max(0, ...)`
/// subtraction and unconditional addition.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Resources {
    pub cpu: u32,
    pub gpu: u32,
    pub mem: u64,
}

impl Resources {
    pub fn new(cpu: u32, gpu: u32, mem: u64) -> Self {
        Resources { cpu, gpu, mem }
    }

    /// True if this exceeds `other` in any single dimension, matching the
    /// original's `gt` (used for "can this supply satisfy this demand?" checks
    /// in reverse: callers compare `demand > supply`)
    pub fn exceeds(&self, other: &Resources) -> bool {
        self.cpu > other.cpu || self.gpu > other.gpu || self.mem > other.mem
    }

    /// True if any dimension is non-zero
    pub fn is_nonzero(&self) -> bool {
        self.cpu > 0 || self.gpu > 0 || self.mem > 0
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_sub(other.cpu),
            gpu: self.gpu.saturating_sub(other.gpu),
            mem: self.mem.saturating_sub(other.mem),
        }
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Self) -> Self::Output {
        Resources {
            cpu: self.cpu.saturating_add(rhs.cpu),
            gpu: self.gpu.saturating_add(rhs.gpu),
            mem: self.mem.saturating_add(rhs.mem),
        }
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(&rhs)
    }
}

impl Mul<u32> for Resources {
    type Output = Resources;

    fn mul(self, rhs: u32) -> Self::Output {
        Resources {
            cpu: self.cpu.saturating_mul(rhs),
            gpu: self.gpu.saturating_mul(rhs),
            mem: self.mem.saturating_mul(rhs as u64),
        }
    }
}

/// The owner of a demand or supply, tracked so scale-up can tag the launched
/// worker with the user whose job triggered it
pub type Owner = Option<String>;

/// Merge two owners, preferring the left the way `self.owner or other.owner` does
fn merge_owner(left: &Owner, right: &Owner) -> Owner {
    left.clone().or_else(|| right.clone())
}

/// A resource demand which can only be satisfied by a single resource
/// supply in its entirety (a non-MPI Grid Engine job)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegralDemand {
    pub resources: Resources,
    pub owner: Owner,
}

impl IntegralDemand {
    pub fn new(cpu: u32, gpu: u32, mem: u64, owner: Owner) -> Self {
        IntegralDemand {
            resources: Resources::new(cpu, gpu, mem),
            owner,
        }
    }

    pub fn exceeds(&self, supply: &ResourceSupply) -> bool {
        self.resources.exceeds(&supply.resources)
    }
}

/// A resource demand which may be split across multiple resource supplies
/// (an MPI Grid Engine job)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FractionalDemand {
    pub resources: Resources,
    pub owner: Owner,
}

impl FractionalDemand {
    pub fn new(cpu: u32, gpu: u32, mem: u64, owner: Owner) -> Self {
        FractionalDemand {
            resources: Resources::new(cpu, gpu, mem),
            owner,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.resources.is_nonzero()
    }

    pub fn exceeds(&self, supply: &ResourceSupply) -> bool {
        self.resources.exceeds(&supply.resources)
    }

    /// Subtract as much of `supply` from this demand as possible, returning
    /// the remaining unmet demand and the unused portion of the supply
    pub fn subtract(&self, supply: &ResourceSupply) -> (FractionalDemand, ResourceSupply) {
        let remaining_demand = FractionalDemand {
            resources: self.resources.saturating_sub(&supply.resources),
            owner: merge_owner(&self.owner, &supply.owner),
        };
        let remaining_supply = ResourceSupply {
            resources: supply.resources.saturating_sub(&self.resources),
            owner: merge_owner(&self.owner, &supply.owner),
        };
        (remaining_demand, remaining_supply)
    }
}

/// Resources a host or instance can supply
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSupply {
    pub resources: Resources,
    #[serde(skip)]
    pub owner: Owner,
}

impl ResourceSupply {
    pub fn new(cpu: u32, gpu: u32, mem: u64) -> Self {
        ResourceSupply {
            resources: Resources::new(cpu, gpu, mem),
            owner: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.resources.is_nonzero()
    }
}

impl Add for ResourceSupply {
    type Output = ResourceSupply;

    fn add(self, rhs: Self) -> Self::Output {
        ResourceSupply {
            resources: self.resources + rhs.resources,
            owner: merge_owner(&self.owner, &rhs.owner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_saturates_at_zero() {
        let demand = FractionalDemand::new(4, 0, 0, None);
        let supply = ResourceSupply::new(10, 0, 0);
        let (remaining_demand, remaining_supply) = demand.subtract(&supply);
        assert!(remaining_demand.is_empty());
        assert_eq!(remaining_supply.resources.cpu, 6);
    }

    #[test]
    fn partial_subtraction_leaves_remaining_demand() {
        let demand = FractionalDemand::new(10, 0, 0, None);
        let supply = ResourceSupply::new(4, 0, 0);
        let (remaining_demand, remaining_supply) = demand.subtract(&supply);
        assert_eq!(remaining_demand.resources.cpu, 6);
        assert!(remaining_supply.is_empty());
    }

    #[test]
    fn exceeds_checks_any_dimension() {
        let demand = IntegralDemand::new(1, 1, 0, None);
        let supply = ResourceSupply::new(4, 0, 1024);
        assert!(demand.exceeds(&supply));
    }
}
