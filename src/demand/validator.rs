//! Rejects jobs that no instance or cluster configuration could ever satisfy
use tracing::warn;

use crate::grid_engine::GridEngine;
use crate::models::job::Job;
use crate::models::resource::{IntegralDemand, ResourceSupply};
use crate::Error;

/// Splits jobs into those the cluster can possibly satisfy and those it
/// never could, grounded on the original's `GridEngineJobValidator.validate`
pub struct JobValidator<'a> {
    grid_engine: &'a GridEngine,
    instance_max_supply: ResourceSupply,
    cluster_max_supply: ResourceSupply,
}

impl<'a> JobValidator<'a> {
    pub fn new(
        grid_engine: &'a GridEngine,
        instance_max_supply: ResourceSupply,
        cluster_max_supply: ResourceSupply,
    ) -> Self {
        JobValidator {
            grid_engine,
            instance_max_supply,
            cluster_max_supply,
        }
    }

    pub async fn validate(&self, jobs: Vec<Job>) -> Result<(Vec<Job>, Vec<Job>), Error> {
        let mut valid_jobs = Vec::new();
        let mut invalid_jobs = Vec::new();
        let mut allocation_rules = std::collections::HashMap::new();
        for job in jobs {
            let allocation_rule = match allocation_rules.get(&job.pe) {
                Some(rule) => *rule,
                None => {
                    let rule = self.grid_engine.get_pe_allocation_rule(&job.pe).await?;
                    allocation_rules.insert(job.pe.clone(), rule);
                    rule
                }
            };
            let job_demand = IntegralDemand::new(job.cpu, job.gpu, job.mem, None);
            let limit = if allocation_rule.is_fractional() {
                &self.cluster_max_supply
            } else {
                &self.instance_max_supply
            };
            if job_demand.exceeds(limit) {
                warn!(
                    job_id = %job.id,
                    job_name = %job.name,
                    job_user = %job.user,
                    job_cpu = job.cpu,
                    available_cpu = limit.resources.cpu,
                    job_gpu = job.gpu,
                    available_gpu = limit.resources.gpu,
                    job_mem = job.mem,
                    available_mem = limit.resources.mem,
                    "invalid job requires resources which cannot be satisfied"
                );
                invalid_jobs.push(job);
                continue;
            }
            valid_jobs.push(job);
        }
        Ok((valid_jobs, invalid_jobs))
    }
}
