//! Picks which instance type(s) to launch to satisfy a set of resource demands
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use crate::demand::Demand;
use crate::instances::provider::InstanceProvider;
use crate::models::instance::InstanceDemand;
use crate::models::resource::{FractionalDemand, ResourceSupply};
use crate::Error;

/// Picks instance types to satisfy a list of resource demands
#[async_trait]
pub trait InstanceSelector: Send + Sync {
    async fn select(&self, demands: &[Demand]) -> Result<Vec<InstanceDemand>, Error>;
}

/// Greedily picks, for each remaining demand set, whichever instance type
/// fulfills the most cpu capacity, repeating until no demand remains or no
/// instance can make further progress
///
/// Grounded on the original's `CpuCapacityInstanceSelector.select`.
pub struct CpuCapacityInstanceSelector<P> {
    pub provider: P,
    pub reserved_supply: ResourceSupply,
}

#[async_trait]
impl<P: InstanceProvider + Sync> InstanceSelector for CpuCapacityInstanceSelector<P> {
    async fn select(&self, demands: &[Demand]) -> Result<Vec<InstanceDemand>, Error> {
        let instances = self.provider.provide().await?;
        let mut remaining: Vec<Demand> = demands.to_vec();
        let mut result = Vec::new();

        while !remaining.is_empty() {
            let mut best_capacity = 0u32;
            let mut best_instance = None;
            let mut best_remaining = None;
            let mut best_fulfilled: Vec<Demand> = Vec::new();

            for instance in &instances {
                let supply = instance.supply().resources.saturating_sub(&self.reserved_supply.resources);
                let supply = ResourceSupply {
                    resources: supply,
                    owner: None,
                };
                let (candidate_remaining, fulfilled) = apply(&remaining, supply)?;
                let capacity: u32 = fulfilled.iter().map(Demand::cpu).sum();
                if capacity > best_capacity {
                    best_capacity = capacity;
                    best_instance = Some(instance.clone());
                    best_remaining = Some(candidate_remaining);
                    best_fulfilled = fulfilled;
                }
            }

            let Some(instance) = best_instance else {
                info!("no available instance types could satisfy the remaining demand");
                break;
            };
            remaining = best_remaining.unwrap_or_default();
            let owner = resolve_owner(&best_fulfilled);
            info!(
                instance = %instance.name,
                used_cpu = best_capacity,
                instance_cpu = instance.cpu,
                ?owner,
                "selecting instance"
            );
            result.push(InstanceDemand { instance, owner });
        }
        Ok(result)
    }
}

/// Apply a supply against a list of demands, returning the remaining unmet
/// demand and the portion of each demand that was fulfilled
///
/// An [`IntegralDemand`] only ever fits a single supply in its entirety: if
/// it doesn't fit, it's carried forward untouched rather than partially
/// credited, matching the original's `_apply` `isinstance(demand,
/// IntegralDemand)` branch. A [`FractionalDemand`] may be split across
/// supplies as before.
fn apply(demands: &[Demand], supply: ResourceSupply) -> Result<(Vec<Demand>, Vec<Demand>), Error> {
    let mut remaining_supply = supply;
    let mut remaining_demands = Vec::new();
    let mut fulfilled_demands = Vec::new();
    for (i, demand) in demands.iter().enumerate() {
        if remaining_supply.is_empty() {
            remaining_demands.extend(demands[i..].iter().cloned());
            break;
        }
        match demand {
            Demand::Integral(integral) => {
                if integral.exceeds(&remaining_supply) {
                    remaining_demands.push(demand.clone());
                } else {
                    let owner = remaining_supply.owner.clone().or_else(|| integral.owner.clone());
                    remaining_supply = ResourceSupply {
                        resources: remaining_supply.resources.saturating_sub(&integral.resources),
                        owner,
                    };
                    fulfilled_demands.push(demand.clone());
                }
            }
            Demand::Fractional(fractional) => {
                let (remaining_demand, next_supply) = fractional.subtract(&remaining_supply);
                remaining_supply = next_supply;
                if !remaining_demand.is_empty() {
                    remaining_demands.push(Demand::Fractional(remaining_demand.clone()));
                }
                let fulfilled = FractionalDemand {
                    resources: fractional.resources.saturating_sub(&remaining_demand.resources),
                    owner: fractional.owner.clone(),
                };
                fulfilled_demands.push(Demand::Fractional(fulfilled));
            }
        }
    }
    Ok((remaining_demands, fulfilled_demands))
}

fn resolve_owner(demands: &[Demand]) -> Option<String> {
    let mut cpu_by_owner: HashMap<Option<String>, u32> = HashMap::new();
    for demand in demands {
        *cpu_by_owner.entry(demand.owner()).or_insert(0) += demand.cpu();
    }
    cpu_by_owner
        .into_iter()
        .max_by_key(|(_, cpu)| *cpu)
        .and_then(|(owner, _)| owner)
}

/// Treats every demand as fractional before delegating to
/// [`CpuCapacityInstanceSelector`], matching the original's
/// `NaiveCpuCapacityInstanceSelector`
pub struct NaiveCpuCapacityInstanceSelector<P> {
    pub inner: CpuCapacityInstanceSelector<P>,
}

#[async_trait]
impl<P: InstanceProvider + Sync> InstanceSelector for NaiveCpuCapacityInstanceSelector<P> {
    async fn select(&self, demands: &[Demand]) -> Result<Vec<InstanceDemand>, Error> {
        self.inner.select(demands).await
    }
}

/// Uses [`CpuCapacityInstanceSelector`] for batch autoscaling, or
/// [`NaiveCpuCapacityInstanceSelector`] otherwise, matching the original's
/// `BackwardCompatibleInstanceSelector`
pub enum BackwardCompatibleInstanceSelector<P> {
    Batch(CpuCapacityInstanceSelector<P>),
    Single(NaiveCpuCapacityInstanceSelector<P>),
}

impl<P> BackwardCompatibleInstanceSelector<P> {
    pub fn new(provider: P, reserved_supply: ResourceSupply, batch_size: usize) -> Self
    where
        P: Clone,
    {
        if batch_size > 1 {
            BackwardCompatibleInstanceSelector::Batch(CpuCapacityInstanceSelector {
                provider,
                reserved_supply,
            })
        } else {
            BackwardCompatibleInstanceSelector::Single(NaiveCpuCapacityInstanceSelector {
                inner: CpuCapacityInstanceSelector {
                    provider,
                    reserved_supply,
                },
            })
        }
    }
}

#[async_trait]
impl<P: InstanceProvider + Sync> InstanceSelector for BackwardCompatibleInstanceSelector<P> {
    async fn select(&self, demands: &[Demand]) -> Result<Vec<InstanceDemand>, Error> {
        match self {
            BackwardCompatibleInstanceSelector::Batch(inner) => inner.select(demands).await,
            BackwardCompatibleInstanceSelector::Single(inner) => inner.select(demands).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instance::{Instance, PriceType};
    use crate::models::resource::IntegralDemand;

    struct StubProvider {
        instances: Vec<Instance>,
    }

    #[async_trait]
    impl InstanceProvider for StubProvider {
        async fn provide(&self) -> Result<Vec<Instance>, Error> {
            Ok(self.instances.clone())
        }
    }

    fn instance(name: &str, cpu: u32) -> Instance {
        Instance {
            name: name.to_string(),
            price_type: PriceType::OnDemand,
            cpu,
            gpu: 0,
            mem: 0,
        }
    }

    /// A single cpu=4 job picks the smallest instance that fully covers it
    /// over a larger instance offering the same fulfilled capacity, and its
    /// owner is carried through to the picked instance demand.
    #[tokio::test]
    async fn ties_are_broken_by_first_encountered_instance() {
        let provider = StubProvider {
            instances: vec![instance("A", 2), instance("B", 4), instance("C", 8)],
        };
        let selector = CpuCapacityInstanceSelector {
            provider,
            reserved_supply: ResourceSupply::default(),
        };
        let demands = vec![Demand::Integral(IntegralDemand::new(4, 0, 0, Some("bob".to_string())))];
        let picked = selector.select(&demands).await.unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].instance.name, "B");
        assert_eq!(picked[0].owner, Some("bob".to_string()));
    }

    /// An integral job can only be fulfilled by a single supply in its
    /// entirety: if no available instance is big enough to fit it, it's
    /// dropped untouched rather than being partially credited against the
    /// closest candidate.
    #[tokio::test]
    async fn integral_demand_exceeding_every_instance_is_not_partially_fulfilled() {
        let provider = StubProvider {
            instances: vec![instance("small", 2), instance("medium", 3)],
        };
        let selector = CpuCapacityInstanceSelector {
            provider,
            reserved_supply: ResourceSupply::default(),
        };
        let demands = vec![Demand::Integral(IntegralDemand::new(5, 0, 0, Some("bob".to_string())))];
        let picked = selector.select(&demands).await.unwrap();
        assert!(picked.is_empty());
    }

    /// Two fractional jobs whose combined demand exceeds any single
    /// instance are covered by repeatedly picking whichever instance fills
    /// the most remaining capacity.
    #[tokio::test]
    async fn fractional_overflow_is_covered_by_successive_picks() {
        let provider = StubProvider {
            instances: vec![instance("small", 4), instance("big", 8)],
        };
        let selector = CpuCapacityInstanceSelector {
            provider,
            reserved_supply: ResourceSupply::default(),
        };
        let demands = vec![
            Demand::Fractional(FractionalDemand::new(6, 0, 0, Some("alice".to_string()))),
            Demand::Fractional(FractionalDemand::new(6, 0, 0, Some("alice".to_string()))),
        ];
        let picked = selector.select(&demands).await.unwrap();
        let names: Vec<&str> = picked.iter().map(|d| d.instance.name.as_str()).collect();
        assert_eq!(names, vec!["big", "small"]);
        let total_cpu: u32 = picked.iter().map(|d| d.instance.cpu).sum();
        assert_eq!(total_cpu, 12);
    }
}
