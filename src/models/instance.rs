//! Cloud instance types
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::resource::ResourceSupply;
use crate::Error;

/// The billing model an instance was launched with
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    OnDemand,
    Spot,
}

impl FromStr for PriceType {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_lowercase().as_str() {
            "on_demand" | "on-demand" | "ondemand" => Ok(PriceType::OnDemand),
            "spot" => Ok(PriceType::Spot),
            other => Err(Error::parsing(format!("unknown price type: {other}"))),
        }
    }
}

impl std::fmt::Display for PriceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceType::OnDemand => write!(f, "on_demand"),
            PriceType::Spot => write!(f, "spot"),
        }
    }
}

/// An available cloud instance type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub price_type: PriceType,
    pub cpu: u32,
    pub gpu: u32,
    pub mem: u64,
}

/// The subset of the cloud pipeline API's instance type response this
/// daemon reads
#[derive(Deserialize, Debug, Clone)]
struct CloudInstanceTypeResponse {
    name: String,
    #[serde(rename = "termType")]
    term_type: String,
    vcpu: u32,
    gpu: u32,
    memory: u64,
}

impl Instance {
    /// Build an [`Instance`] from a decoded cloud pipeline API response
    pub fn from_cp_response(raw: serde_json::Value) -> Result<Self, Error> {
        let response: CloudInstanceTypeResponse = serde_json::from_value(raw)
            .map_err(|err| Error::parsing(format!("invalid instance type response: {err}")))?;
        Ok(Instance {
            name: response.name,
            price_type: response.term_type.parse()?,
            cpu: response.vcpu,
            gpu: response.gpu,
            mem: response.memory,
        })
    }

    /// The resources this instance supplies
    pub fn supply(&self) -> ResourceSupply {
        ResourceSupply::new(self.cpu, self.gpu, self.mem)
    }

    /// The instance family name, i.e. everything before the first `.`
    /// (`m5.2xlarge` -> `m5`), used by hybrid autoscaling to restrict
    /// candidates to a single family
    pub fn family(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// A resolved instance demand: the instance type to launch plus the owner
/// whose job(s) drove the decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDemand {
    pub instance: Instance,
    pub owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_splits_on_dot() {
        let instance = Instance {
            name: "m5.2xlarge".to_string(),
            price_type: PriceType::OnDemand,
            cpu: 8,
            gpu: 0,
            mem: 32,
        };
        assert_eq!(instance.family(), "m5");
    }

    #[test]
    fn price_type_parses_case_insensitively() {
        assert_eq!("SPOT".parse::<PriceType>().unwrap(), PriceType::Spot);
        assert_eq!("on_demand".parse::<PriceType>().unwrap(), PriceType::OnDemand);
        assert!("bogus".parse::<PriceType>().is_err());
    }
}
