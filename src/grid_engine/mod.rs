//! Grid Engine client: command templates, XML parsing, host lifecycle
pub mod xml;

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone, Utc};
use tracing::{instrument, warn};

use crate::cmd::CmdExecutor;
use crate::models::job::{AllocationRule, Job, JobState};
use crate::models::resource::ResourceSupply;
use crate::Error;

const QSTAT: &str = r#"qstat -u "*" -r -f -xml"#;
const QHOST: &str = "qhost -q -xml";
const QSTAT_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const BAD_HOST_STATES: &[char] = &['u', 'E', 'd'];

/// The Grid Engine client: every interaction with the scheduler's CLI tools
/// is funneled through here, grounded on the original's `GridEngine` class.
pub struct GridEngine {
    cmd: Arc<dyn CmdExecutor>,
    queue: String,
    hostlist: String,
    queue_default: bool,
    gpu_resource_name: String,
    mem_resource_name: String,
}

impl GridEngine {
    pub fn new(
        cmd: Arc<dyn CmdExecutor>,
        queue: String,
        hostlist: String,
        queue_default: bool,
        gpu_resource_name: String,
        mem_resource_name: String,
    ) -> Self {
        GridEngine {
            cmd,
            queue,
            hostlist,
            queue_default,
            gpu_resource_name,
            mem_resource_name,
        }
    }

    /// List every job currently in or pending for this daemon's queue
    #[instrument(name = "grid_engine.get_jobs", skip(self))]
    pub async fn get_jobs(&self) -> Result<Vec<Job>, Error> {
        let output = match self.cmd.execute(QSTAT).await {
            Ok(output) => output,
            Err(_) => {
                warn!("grid engine jobs listing has failed");
                return Ok(Vec::new());
            }
        };
        let root: xml::QstatRoot =
            quick_xml::de::from_str(&output).map_err(|err| Error::parsing(err.to_string()))?;

        let mut entries: Vec<(Option<String>, xml::JobListEntry)> = Vec::new();
        for queue_list in &root.queue_info.queue_list {
            for job_list in &queue_list.job_list {
                entries.push((Some(queue_list.name.clone()), job_list.clone()));
            }
        }
        for job_list in &root.job_info.job_list {
            entries.push((None, job_list.clone()));
        }

        let mut jobs: std::collections::HashMap<String, Job> = std::collections::HashMap::new();
        for (tmp_queue_name, entry) in entries {
            let (job_actual_queue, job_host) = tmp_queue_name
                .as_deref()
                .map(Self::parse_queue_and_host)
                .unwrap_or((None, None));
            let job_requested_queue = entry.hard_req_queue.as_deref();
            if job_requested_queue.is_some_and(|q| q != self.queue)
                || job_actual_queue.as_deref().is_some_and(|q| q != self.queue)
            {
                continue;
            }
            if job_requested_queue.is_none() && job_actual_queue.is_none() && !self.queue_default {
                continue;
            }
            let root_job_id = entry.jb_job_number.clone();
            let job_tasks = Self::parse_array(entry.tasks.as_deref());
            let job_ids: Vec<String> = if job_tasks.is_empty() {
                vec![root_job_id.clone()]
            } else {
                job_tasks
                    .iter()
                    .map(|task| format!("{root_job_id}.{task}"))
                    .collect()
            };
            let job_state = JobState::from_letter_code(&entry.state)?;
            let raw_datetime = entry
                .jat_start_time
                .as_deref()
                .or(entry.jb_submission_time.as_deref())
                .ok_or_else(|| Error::parsing("job has no start or submission time"))?;
            let job_datetime = Self::parse_date(raw_datetime)?;
            let job_hosts: Vec<String> = job_host.iter().cloned().collect();
            let (job_pe, job_cpu) = match &entry.requested_pe {
                Some(pe) => (
                    pe.name.clone(),
                    pe.text
                        .as_deref()
                        .unwrap_or("1")
                        .parse()
                        .map_err(|_| Error::parsing("requested_pe is not a valid integer"))?,
                ),
                None => ("local".to_string(), 1),
            };
            let mut job_gpu = 0u32;
            let mut job_mem = 0u64;
            for hard_request in &entry.hard_request {
                if hard_request.name == self.gpu_resource_name {
                    let raw = hard_request.text.as_deref().unwrap_or("0");
                    match raw.parse() {
                        Ok(value) => job_gpu = value,
                        Err(_) => warn!(job_id = %root_job_id, %raw, "invalid gpu requirement"),
                    }
                }
                if hard_request.name == self.mem_resource_name {
                    let raw = hard_request.text.as_deref().unwrap_or("0G");
                    match Self::parse_mem(raw) {
                        Ok(value) => job_mem = value,
                        Err(_) => warn!(job_id = %root_job_id, %raw, "invalid mem requirement"),
                    }
                }
            }
            for job_id in job_ids {
                jobs.entry(job_id)
                    .and_modify(|job| job.hosts.extend(job_host.clone()))
                    .or_insert_with(|| Job {
                        id: job_id.clone(),
                        root_id: root_job_id.clone(),
                        name: entry.jb_name.clone(),
                        user: entry.jb_owner.clone(),
                        state: job_state,
                        datetime: job_datetime,
                        hosts: job_hosts.clone(),
                        cpu: job_cpu,
                        gpu: job_gpu,
                        mem: job_mem,
                        pe: job_pe.clone(),
                    });
            }
        }
        Ok(jobs.into_values().collect())
    }

    fn parse_date(raw: &str) -> Result<chrono::DateTime<Utc>, Error> {
        let naive = NaiveDateTime::parse_from_str(raw, QSTAT_DATETIME_FORMAT)?;
        Ok(Utc.from_utc_datetime(&naive))
    }

    fn parse_queue_and_host(queue_and_host: &str) -> (Option<String>, Option<String>) {
        let mut parts = queue_and_host.splitn(2, '@');
        let queue = parts.next().map(str::to_string);
        let host = parts.next().map(str::to_string);
        (queue, host)
    }

    fn parse_array(array_jobs: Option<&str>) -> Vec<u32> {
        let mut result = Vec::new();
        let Some(array_jobs) = array_jobs else {
            return result;
        };
        for interval in array_jobs.split(',') {
            if let Some((borders, _step)) = interval.split_once(':') {
                if let Some((start, stop)) = borders.split_once('-') {
                    if let (Ok(start), Ok(stop)) = (start.parse::<u32>(), stop.parse::<u32>()) {
                        result.extend(start..=stop);
                    }
                }
            } else if let Ok(value) = interval.parse::<u32>() {
                result.push(value);
            }
        }
        result
    }

    /// Parse a Grid Engine memory request (`sge_types(1)`) into gibibytes,
    /// rounding up
    fn parse_mem(mem_request: &str) -> Result<u64, Error> {
        if mem_request.is_empty() {
            return Ok(0);
        }
        let last = mem_request.chars().last().unwrap();
        let (number, modifier): (&str, u64) = match last {
            'k' => (&mem_request[..mem_request.len() - 1], 1000),
            'm' => (&mem_request[..mem_request.len() - 1], 1000u64.pow(2)),
            'g' => (&mem_request[..mem_request.len() - 1], 1000u64.pow(3)),
            'K' => (&mem_request[..mem_request.len() - 1], 1024),
            'M' => (&mem_request[..mem_request.len() - 1], 1024u64.pow(2)),
            'G' => (&mem_request[..mem_request.len() - 1], 1024u64.pow(3)),
            _ => (mem_request, 1),
        };
        let number: u64 = number
            .parse()
            .map_err(|_| Error::parsing(format!("invalid mem request: {mem_request}")))?;
        let bytes = number.saturating_mul(modifier);
        let gib = 1024u64.pow(3);
        Ok(bytes.div_ceil(gib))
    }

    /// Disable a host so it stops receiving new jobs, without aborting any
    /// job already running on it
    pub async fn disable_host(&self, host: &str) -> Result<(), Error> {
        self.cmd
            .execute(&format!("qmod -d {}@{host}", self.queue))
            .await?;
        Ok(())
    }

    /// Re-enable a previously disabled host
    pub async fn enable_host(&self, host: &str) -> Result<(), Error> {
        self.cmd
            .execute(&format!("qmod -e {}@{host}", self.queue))
            .await?;
        Ok(())
    }

    /// Look up a parallel environment's allocation rule
    pub async fn get_pe_allocation_rule(&self, pe: &str) -> Result<AllocationRule, Error> {
        let output = self
            .cmd
            .execute(&format!(
                r#"qconf -sp {pe} | grep "^allocation_rule" | awk '{{print $2}}'"#
            ))
            .await?;
        let trimmed = output.trim();
        if trimmed.is_empty() {
            Ok(AllocationRule::PeSlots)
        } else {
            AllocationRule::parse(trimmed)
        }
    }

    /// Completely remove a host from Grid Engine: shut down its execution
    /// daemon, then strip it from queue settings, its hostgroup, the
    /// administrative hosts list, and finally Grid Engine itself
    pub async fn delete_host(&self, host: &str, skip_on_failure: bool) -> Result<(), Error> {
        self.perform(
            self.cmd.execute(&format!("qconf -ke {host}")),
            "shutdown GE host execution daemon has failed",
            skip_on_failure,
        )
        .await?;
        self.perform(
            self.cmd
                .execute(&format!("qconf -purge queue slots {}@{host}", self.queue)),
            "removing host from queue settings has failed",
            skip_on_failure,
        )
        .await?;
        self.perform(
            self.cmd
                .execute(&format!("qconf -dattr hostgroup hostlist {host} {}", self.hostlist)),
            "removing host from host group has failed",
            skip_on_failure,
        )
        .await?;
        self.perform(
            self.cmd.execute(&format!("qconf -dh {host}")),
            "removing host from list of administrative hosts has failed",
            skip_on_failure,
        )
        .await?;
        self.perform(
            self.cmd.execute(&format!("qconf -de {host}")),
            "removing host from GE has failed",
            skip_on_failure,
        )
        .await?;
        Ok(())
    }

    async fn perform(
        &self,
        action: impl std::future::Future<Output = Result<String, Error>>,
        error_msg: &str,
        skip_on_failure: bool,
    ) -> Result<(), Error> {
        if let Err(err) = action.await {
            warn!(%error_msg, error = %err, "grid engine command failed");
            if !skip_on_failure {
                return Err(err);
            }
        }
        Ok(())
    }

    /// List every queue host's free capacity, skipping any host in a bad state
    pub async fn get_host_supplies(&self) -> Result<Vec<ResourceSupply>, Error> {
        let output = self.cmd.execute(QHOST).await?;
        let root: xml::QhostRoot =
            quick_xml::de::from_str(&output).map_err(|err| Error::parsing(err.to_string()))?;
        let mut supplies = Vec::new();
        for host in &root.hosts {
            for queue in host.queues.iter().filter(|q| q.name == self.queue) {
                let states = queue.value("state_string").unwrap_or_default();
                if states.chars().any(|c| BAD_HOST_STATES.contains(&c)) {
                    continue;
                }
                let slots: u32 = queue.value("slots").unwrap_or("0").parse().unwrap_or(0);
                let used: u32 = queue.value("slots_used").unwrap_or("0").parse().unwrap_or(0);
                let resv: u32 = queue.value("slots_resv").unwrap_or("0").parse().unwrap_or(0);
                supplies.push(
                    ResourceSupply::new(slots, 0, 0)
                        .resources
                        .saturating_sub(&ResourceSupply::new(used + resv, 0, 0).resources)
                        .into(),
                );
            }
        }
        Ok(supplies)
    }

    /// Look up a single host's total processor count via `qconf -se`
    pub async fn get_host_supply(&self, host: &str) -> Result<ResourceSupply, Error> {
        for line in self
            .cmd
            .execute_to_lines(&format!("qconf -se {host}"))
            .await?
        {
            if line.contains("processors") {
                if let Some(cpu) = line.split_whitespace().nth(1).and_then(|v| v.parse().ok()) {
                    return Ok(ResourceSupply::new(cpu, 0, 0));
                }
            }
        }
        Ok(ResourceSupply::default())
    }

    /// Validate that a host is a known, healthy Grid Engine execution host
    pub async fn is_valid(&self, host: &str) -> bool {
        if self
            .cmd
            .execute_to_lines(&format!("qconf -se {host}"))
            .await
            .is_err()
        {
            return false;
        }
        let output = match self.cmd.execute(QHOST).await {
            Ok(output) => output,
            Err(_) => return false,
        };
        let root: xml::QhostRoot = match quick_xml::de::from_str(&output) {
            Ok(root) => root,
            Err(_) => return false,
        };
        for host_object in root.hosts.iter().filter(|h| h.name == host) {
            for queue in host_object.queues.iter().filter(|q| q.name == self.queue) {
                let states = queue.value("state_string").unwrap_or_default();
                for state in states.chars() {
                    if BAD_HOST_STATES.contains(&state) {
                        warn!(%host, %state, "execution host GE state makes it invalid");
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Kill a set of jobs, optionally forcibly
    pub async fn kill_jobs(&self, jobs: &[Job], force: bool) -> Result<(), Error> {
        if jobs.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = jobs.iter().map(|job| job.id.as_str()).collect();
        let cmd = if force { "qdel -f" } else { "qdel" };
        self.cmd.execute(&format!("{cmd} {}", ids.join(" "))).await?;
        Ok(())
    }
}

impl From<crate::models::resource::Resources> for ResourceSupply {
    fn from(resources: crate::models::resource::Resources) -> Self {
        ResourceSupply {
            resources,
            owner: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mem_rounds_up_to_whole_gibibytes() {
        assert_eq!(GridEngine::parse_mem("1G").unwrap(), 1);
        assert_eq!(GridEngine::parse_mem("1500M").unwrap(), 2);
        assert_eq!(GridEngine::parse_mem("").unwrap(), 0);
    }

    #[test]
    fn parse_array_expands_ranges_and_lists() {
        assert_eq!(GridEngine::parse_array(Some("1-3:1")), vec![1, 2, 3]);
        assert_eq!(GridEngine::parse_array(Some("5")), vec![5]);
        assert_eq!(GridEngine::parse_array(None), Vec::<u32>::new());
    }

    #[test]
    fn parse_queue_and_host_splits_on_at() {
        assert_eq!(
            GridEngine::parse_queue_and_host("main.q@worker-1"),
            (Some("main.q".to_string()), Some("worker-1".to_string()))
        );
    }
}
