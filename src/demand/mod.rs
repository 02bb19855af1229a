//! Turning pending jobs into resource demands an instance selector can act on
pub mod selector;
pub mod validator;

use crate::models::resource::{FractionalDemand, IntegralDemand, Owner};

/// A single job's resource demand, typed by whether it may be split across
/// multiple hosts
///
/// The original kept `IntegralDemand`/`FractionalDemand` as distinct
/// `isinstance`-checked subclasses of the same base; this enum gets the same
/// effect without runtime type checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Demand {
    Integral(IntegralDemand),
    Fractional(FractionalDemand),
}

impl Demand {
    pub fn cpu(&self) -> u32 {
        match self {
            Demand::Integral(demand) => demand.resources.cpu,
            Demand::Fractional(demand) => demand.resources.cpu,
        }
    }

    pub fn owner(&self) -> Owner {
        match self {
            Demand::Integral(demand) => demand.owner.clone(),
            Demand::Fractional(demand) => demand.owner.clone(),
        }
    }

    pub fn as_fractional(&self) -> FractionalDemand {
        match self {
            Demand::Integral(demand) => FractionalDemand::new(
                demand.resources.cpu,
                demand.resources.gpu,
                demand.resources.mem,
                demand.owner.clone(),
            ),
            Demand::Fractional(demand) => demand.clone(),
        }
    }
}
