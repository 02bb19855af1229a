//! The static parameter registry
//!
//! The original implementation built this table at runtime by reflecting over
//! attributes of a `GridEngineParametersGroup` instance (`as_gen` walked
//! `dir(self)` looking for `GridEngineParameter` values). Rust has no
//! reflection, so the table is just written out once here. `--list-params`
//! walks it the same way the original's CLI help did.

/// A single documented environment variable this daemon reads
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// The parameter group this belongs to (`autoscaling`, `autoscaling_advanced`, `queue`)
    pub group: &'static str,
    /// The environment variable name
    pub name: &'static str,
    /// A human-readable description of the parameter
    pub help: &'static str,
}

/// Every environment variable this daemon reads, grouped and documented
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE",
        help: "Enables autoscaling.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_WORKERS",
        help: "Specifies a maximum number of autoscaling workers.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_INSTANCE_TYPE",
        help: "Specifies worker instance type.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_INSTANCE_DISK",
        help: "Specifies worker disk size.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_INSTANCE_IMAGE",
        help: "Specifies worker docker image.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_PRICE_TYPE",
        help: "Specifies worker price type.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_CMD_TEMPLATE",
        help: "Specifies worker cmd template.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_HYBRID",
        help: "Enables hybrid autoscaling.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_HYBRID_FAMILY",
        help: "Specifies hybrid worker instance type family.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_HYBRID_MAX_CORE_PER_NODE",
        help: "Specifies a maximum number of CPUs available on hybrid autoscaling workers. If specified only instance types which have less or equal number of CPUs will be used.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_DESCENDING",
        help: "Enables descending autoscaling: prefers the default instance type while it's available, falls back to smaller instance types from the same family when it's not.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_SCALE_UP_STRATEGY",
        help: "Specifies autoscaling strategy. Allowed values: cpu-capacity (default), naive-cpu-capacity (deprecated), default (deprecated).",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_SCALE_UP_BATCH_SIZE",
        help: "Specifies a maximum number of simultaneously scaling up workers.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_SCALE_UP_POLLING_DELAY",
        help: "Specifies a status polling delay in seconds for workers scaling up.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_INSTANCE_UNAVAILABILITY_DELAY",
        help: "Specifies a delay in seconds to temporarily avoid unavailable instance types. An instance type is considered unavailable if the cloud region lacks such instances at the moment.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_SCALE_DOWN_BATCH_SIZE",
        help: "Specifies a maximum number of simultaneously scaling down workers.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_IDLE_TIMEOUT",
        help: "Specifies a timeout in seconds after which an inactive worker is considered idle and is scaled down.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_LOGDIR",
        help: "Specifies logging directory.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_VERBOSE",
        help: "Enables verbose logging.",
    },
    ParamSpec {
        group: "autoscaling_advanced",
        name: "CP_CAP_AUTOSCALE_CLOUD_PROVIDER",
        help: "Specifies worker cloud provider. Allowed values: AWS, GCP, AZURE.",
    },
    ParamSpec {
        group: "autoscaling_advanced",
        name: "CP_CAP_AUTOSCALE_CLOUD_REGION_ID",
        help: "Specifies cloud region id.",
    },
    ParamSpec {
        group: "autoscaling_advanced",
        name: "CP_CAP_AUTOSCALE_OWNER_PARAMETER_NAME",
        help: "Specifies the worker launch parameter name used to tag a worker with its owner, for per-user billing.",
    },
    ParamSpec {
        group: "autoscaling_advanced",
        name: "CP_CAP_AUTOSCALE_WORKDIR",
        help: "Specifies autoscaler working directory.",
    },
    ParamSpec {
        group: "autoscaling_advanced",
        name: "CP_CAP_AUTOSCALE_TASK",
        help: "Specifies logging task name.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_SGE_QUEUE_NAME",
        help: "Specifies the name of the queue which is going to be autoscaled.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_SGE_QUEUE_STATIC",
        help: "Enables static queue processing: all static workers are considered part of this queue.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_SGE_QUEUE_DEFAULT",
        help: "Enables default queue processing: all jobs without a hard queue requirement are considered part of this queue.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_SGE_HOSTLIST_NAME",
        help: "Specifies the name of the hostlist associated with the autoscaling queue.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_SGE_WORKER_FREE_CORES",
        help: "Specifies the number of cores to reserve on every worker.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_SGE_MASTER_CORES",
        help: "Specifies the number of cores available on the cluster manager.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_GE_CONSUMABLE_RESOURCE_NAME_GPU",
        help: "Specifies the name of the GPU consumable resource.",
    },
    ParamSpec {
        group: "queue",
        name: "CP_CAP_GE_CONSUMABLE_RESOURCE_NAME_RAM",
        help: "Specifies the name of the RAM consumable resource.",
    },
    ParamSpec {
        group: "autoscaling",
        name: "CP_CAP_AUTOSCALE_ACTIVE_TIMEOUT",
        help: "Specifies a timeout in seconds after which an idled worker's in-use tag is cleared.",
    },
];

/// Print every parameter as `name: help`, grouped, matching the original's
/// `GridEngineParametersGroup.as_gen` CLI output ordering
pub fn print_params() {
    for group in ["autoscaling", "autoscaling_advanced", "queue"] {
        println!("[{group}]");
        for param in PARAMETERS.iter().filter(|p| p.group == group) {
            println!("  {}: {}", param.name, param.help);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_parameter_has_a_unique_name() {
        let mut names: Vec<&str> = PARAMETERS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }
}
