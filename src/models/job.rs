//! Grid Engine job types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The lifecycle state of a Grid Engine job
///
/// The original raised the bare string `GridEngineJobState.UNKNOWN` when a
/// letter code matched nothing, effectively using an enum member as its own
/// exception. We return a real `Error` instead, per the redesign.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Pending,
    Suspended,
    Errored,
    Deleted,
}

impl JobState {
    /// Map a `qstat` status letter combination to a [`JobState`]
    ///
    /// # Arguments
    ///
    /// * `code` - The raw `state` field from `qstat`'s XML output, e.g. `r`, `qw`, `Eqw`
    pub fn from_letter_code(code: &str) -> Result<Self, Error> {
        const RUNNING: &[&str] = &["r", "t", "Rr", "Rt"];
        const PENDING: &[&str] = &["qw", "hqw", "hRwq"];
        const SUSPENDED: &[&str] = &[
            "s", "ts", "S", "tS", "T", "tT", "Rs", "Rts", "RS", "RtS", "RT", "RtT",
        ];
        const ERRORED: &[&str] = &["Eqw", "Ehqw", "EhRqw"];
        const DELETED: &[&str] = &[
            "dr", "dt", "dRr", "dRt", "ds", "dS", "dT", "dRs", "dRS", "dRT",
        ];
        if RUNNING.contains(&code) {
            Ok(JobState::Running)
        } else if PENDING.contains(&code) {
            Ok(JobState::Pending)
        } else if SUSPENDED.contains(&code) {
            Ok(JobState::Suspended)
        } else if ERRORED.contains(&code) {
            Ok(JobState::Errored)
        } else if DELETED.contains(&code) {
            Ok(JobState::Deleted)
        } else {
            Err(Error::parsing(format!("unrecognized job state code: {code}")))
        }
    }
}

/// The allocation rule of a parallel environment, controlling whether a
/// job's demand can be split across hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationRule {
    PeSlots,
    FillUp,
    RoundRobin,
}

impl AllocationRule {
    /// Parse the raw `qconf -sp` allocation_rule value
    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "$pe_slots" => Ok(AllocationRule::PeSlots),
            "$fill_up" => Ok(AllocationRule::FillUp),
            "$round_robin" => Ok(AllocationRule::RoundRobin),
            other => Err(Error::parsing(format!("unrecognized allocation rule: {other}"))),
        }
    }

    /// Rules whose jobs may be split across multiple hosts (fractional demand)
    pub fn is_fractional(&self) -> bool {
        matches!(self, AllocationRule::FillUp | AllocationRule::RoundRobin)
    }
}

/// A single Grid Engine job, possibly one task of an array job
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub root_id: String,
    pub name: String,
    pub user: String,
    pub state: JobState,
    pub datetime: DateTime<Utc>,
    pub hosts: Vec<String>,
    pub cpu: u32,
    pub gpu: u32,
    pub mem: u64,
    pub pe: String,
}

impl Job {
    /// `true` if this job uses the default (non-parallel) environment
    pub fn is_local(&self) -> bool {
        self.pe == "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_codes_map_to_running() {
        assert_eq!(JobState::from_letter_code("r").unwrap(), JobState::Running);
        assert_eq!(JobState::from_letter_code("Rt").unwrap(), JobState::Running);
    }

    #[test]
    fn unknown_code_is_an_error_not_a_panic() {
        assert!(JobState::from_letter_code("zz").is_err());
    }

    #[test]
    fn fractional_rules_are_splittable() {
        assert!(AllocationRule::FillUp.is_fractional());
        assert!(AllocationRule::RoundRobin.is_fractional());
        assert!(!AllocationRule::PeSlots.is_fractional());
    }
}
