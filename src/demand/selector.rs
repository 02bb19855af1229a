//! Converts pending jobs into per-job resource demands
use std::collections::HashMap;

use tracing::instrument;

use crate::demand::Demand;
use crate::grid_engine::GridEngine;
use crate::models::job::Job;
use crate::models::resource::{FractionalDemand, IntegralDemand, ResourceSupply};
use crate::Error;

/// Builds one [`Demand`] per pending job, offsetting fractional (splittable)
/// jobs against the cluster's currently free capacity first
///
/// Grounded on the original's `GridEngineDemandSelector.select`: jobs are
/// processed in `root_id` order, and a running total of free cluster supply
/// is drawn down as fractional jobs are satisfied so that jobs which already
/// fit in spare capacity don't trigger a scale-up.
pub struct DemandSelector<'a> {
    grid_engine: &'a GridEngine,
}

impl<'a> DemandSelector<'a> {
    pub fn new(grid_engine: &'a GridEngine) -> Self {
        DemandSelector { grid_engine }
    }

    #[instrument(name = "demand.select", skip(self, jobs))]
    pub async fn select(&self, jobs: &[Job]) -> Result<Vec<Demand>, Error> {
        let mut remaining_supply = self
            .grid_engine
            .get_host_supplies()
            .await?
            .into_iter()
            .fold(ResourceSupply::default(), |acc, supply| acc + supply);

        let mut allocation_rules = HashMap::new();
        let mut sorted_jobs: Vec<&Job> = jobs.iter().collect();
        sorted_jobs.sort_by(|a, b| a.root_id.cmp(&b.root_id));

        let mut demands = Vec::with_capacity(sorted_jobs.len());
        for job in sorted_jobs {
            let allocation_rule = match allocation_rules.get(&job.pe) {
                Some(rule) => *rule,
                None => {
                    let rule = self.grid_engine.get_pe_allocation_rule(&job.pe).await?;
                    allocation_rules.insert(job.pe.clone(), rule);
                    rule
                }
            };
            if allocation_rule.is_fractional() {
                let demand = FractionalDemand::new(job.cpu, 0, 0, Some(job.user.clone()));
                let (mut remaining_demand, next_supply) = demand.subtract(&remaining_supply);
                remaining_supply = next_supply;
                if remaining_demand.is_empty() {
                    remaining_demand = FractionalDemand::new(1, 0, 0, Some(job.user.clone()));
                }
                demands.push(Demand::Fractional(remaining_demand));
            } else {
                demands.push(Demand::Integral(IntegralDemand::new(
                    job.cpu,
                    job.gpu,
                    job.mem,
                    Some(job.user.clone()),
                )));
            }
        }
        Ok(demands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::fake::FakeCmdExecutor;
    use crate::models::job::JobState;
    use chrono::Utc;
    use std::sync::Arc;

    fn job(pe: &str, cpu: u32, root_id: &str) -> Job {
        Job {
            id: root_id.to_string(),
            root_id: root_id.to_string(),
            name: "job".to_string(),
            user: "alice".to_string(),
            state: JobState::Pending,
            datetime: Utc::now(),
            hosts: Vec::new(),
            cpu,
            gpu: 0,
            mem: 0,
            pe: pe.to_string(),
        }
    }

    #[tokio::test]
    async fn local_jobs_become_integral_demands() {
        let fake = Arc::new(FakeCmdExecutor::new());
        fake.push_ok("<qhost></qhost>");
        let ge = GridEngine::new(
            fake,
            "main.q".to_string(),
            "@allhosts".to_string(),
            true,
            "gpus".to_string(),
            "ram".to_string(),
        );
        let selector = DemandSelector::new(&ge);
        let demands = selector.select(&[job("local", 4, "1")]).await.unwrap();
        assert_eq!(demands.len(), 1);
        assert!(matches!(demands[0], Demand::Integral(_)));
        assert_eq!(demands[0].cpu(), 4);
        assert_eq!(demands[0].owner(), Some("alice".to_string()));
    }
}
