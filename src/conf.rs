//! The config for the Grid Engine Autoscaler
//!
//! Connection info and logging come from a small YAML file overlaid with
//! environment variables, the way the teacher's `Conf` loads. Everything else
//! the daemon tunes is read directly from the flat `CP_CAP_AUTOSCALE_*`/
//! `CP_CAP_SGE_*` environment variables documented in [`crate::params`],
//! mirroring the original's `GridEngineParametersGroup` tables -- `Conf`
//! just gives each group a typed `from_env` constructor instead of the
//! original's reflection-based `as_gen`.
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::instance::PriceType;
use crate::Error;

/// Read an optional env var, falling back to a default if unset or empty
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, Error> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| Error::parsing(format!("{name} is not valid: {value}"))),
        _ => Ok(default),
    }
}

/// Read a `true`/`false` env var, falling back to a default if unset
fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Read a required env var, checking the parameter name first and an
/// optional fallback env var second, matching the original's chained
/// `os.getenv(params...name, os.environ['FALLBACK'])` calls
fn env_required(name: &str, fallback: &str) -> Result<String, Error> {
    if let Ok(value) = env::var(name) {
        if !value.is_empty() {
            return Ok(value);
        }
    }
    env::var(fallback)
        .map_err(|_| Error::new(format!("neither {name} nor {fallback} is set")))
}

/// The cloud the autoscaler is launching instances into
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    #[serde(rename = "AWS")]
    Aws,
    #[serde(rename = "GCP")]
    Gcp,
    #[serde(rename = "AZURE")]
    Azure,
}

impl FromStr for CloudProvider {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "AWS" => Ok(CloudProvider::Aws),
            "GCP" => Ok(CloudProvider::Gcp),
            "AZURE" => Ok(CloudProvider::Azure),
            other => Err(Error::parsing(format!("unknown cloud provider: {other}"))),
        }
    }
}

/// Connection info for the cloud pipeline HTTP API
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Connection {
    /// The base url of the cloud pipeline API
    pub api: String,
    /// The bearer token to authenticate with
    pub api_token: String,
    /// The run id of the master node hosting this daemon
    pub run_id: String,
}

impl Connection {
    /// Build our connection settings from `API`/`API_TOKEN`/`RUN_ID`
    pub fn from_env() -> Result<Self, Error> {
        Ok(Connection {
            api: env::var("API").map_err(|_| Error::new("API is not set"))?,
            api_token: env::var("API_TOKEN").map_err(|_| Error::new("API_TOKEN is not set"))?,
            run_id: env::var("RUN_ID").map_err(|_| Error::new("RUN_ID is not set"))?,
        })
    }
}

/// Optional YAML overrides for [`Connection`]
#[derive(Deserialize, Debug, Default)]
struct ConnectionOverride {
    api: Option<String>,
    api_token: Option<String>,
}

/// Logging settings
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Logging {
    /// The directory to write rotated log files to, if any
    pub dir: Option<PathBuf>,
    /// Whether to raise the default log level to debug
    #[serde(default)]
    pub verbose: bool,
}

impl Logging {
    /// Build our logging settings from `CP_CAP_AUTOSCALE_LOGDIR`/`LOG_DIR`
    /// and `CP_CAP_AUTOSCALE_VERBOSE`
    pub fn from_env() -> Self {
        let verbose = env_flag("CP_CAP_AUTOSCALE_VERBOSE", false);
        let dir = env::var("CP_CAP_AUTOSCALE_LOGDIR")
            .or_else(|_| env::var("LOG_DIR"))
            .ok()
            .map(PathBuf::from);
        Logging { dir, verbose }
    }
}

/// The instance-selection strategy to use
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleUpStrategy {
    #[default]
    CpuCapacity,
    NaiveCpuCapacity,
    BackwardCompatible,
}

impl FromStr for ScaleUpStrategy {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "cpu-capacity" => Ok(ScaleUpStrategy::CpuCapacity),
            "naive-cpu-capacity" => Ok(ScaleUpStrategy::NaiveCpuCapacity),
            "default" => Ok(ScaleUpStrategy::BackwardCompatible),
            other => Err(Error::parsing(format!("unknown scale up strategy: {other}"))),
        }
    }
}

/// Settings for how and what to launch when scaling up
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Autoscaling {
    /// Whether autoscaling is enabled at all
    pub enabled: bool,
    /// The maximum number of additional workers this daemon may run at once
    pub max_additional_hosts: u32,
    /// The default instance type to launch
    pub instance_type: String,
    /// The disk size, in GB, to attach to launched instances
    pub instance_disk: u32,
    /// The docker image to launch instances with
    pub instance_image: String,
    /// The price type to launch instances with
    pub price_type: PriceType,
    /// The command template to run on launched instances
    pub cmd_template: String,
    /// Whether to restrict instance candidates to a family plus the default type
    pub hybrid: bool,
    /// The family to restrict to when hybrid is enabled
    pub hybrid_family: Option<String>,
    /// The max cpu per node to allow when hybrid is enabled
    pub hybrid_max_core_per_node: Option<u32>,
    /// Whether to sort instance candidates by cpu descending
    pub descending: bool,
    /// The instance-selection strategy
    pub scale_up_strategy: ScaleUpStrategy,
    /// How many additional workers may be launched in a single scale-up batch
    pub scale_up_batch_size: usize,
    /// How many additional workers may be torn down in a single scale-down batch
    pub scale_down_batch_size: usize,
    /// Seconds between polling attempts while waiting on a scale-up batch
    pub scale_up_polling_delay: u64,
    /// Seconds to avoid retrying an instance type after a capacity error
    pub scale_up_unavailability_delay: i64,
    /// Minimum inactivity before a worker is eligible for scale-down
    pub idle_timeout: i64,
    /// Seconds a pending job may wait before a scale-up is considered late.
    ///
    /// Sourced from the cloud preferences endpoint (`ge.autoscaling.scale.up.timeout`),
    /// not an environment variable -- [`crate::cloud::PipelineClient::preferences`]
    /// overwrites this default after [`Autoscaling::from_env`] runs.
    pub scale_up_timeout: i64,
    /// Seconds after the last running job before idle workers are scaled down.
    ///
    /// Sourced from `ge.autoscaling.scale.down.timeout`, same caveat as
    /// [`Autoscaling::scale_up_timeout`].
    pub scale_down_timeout: i64,
    /// Seconds to wait for a launched instance to become ready.
    ///
    /// Sourced from `ge.autoscaling.scale.up.polling.timeout`, same caveat as
    /// [`Autoscaling::scale_up_timeout`].
    pub scale_up_polling_timeout: u64,
}

impl Autoscaling {
    /// Build our autoscaling settings from the `CP_CAP_AUTOSCALE_*` env vars
    ///
    /// The three timeouts normally sourced from the cloud preferences
    /// endpoint are seeded with the original's hardcoded defaults here;
    /// call [`crate::cloud::PipelineClient::load_preferences`] to refresh
    /// them once a client is available.
    pub fn from_env() -> Result<Self, Error> {
        let hybrid_family = env::var("CP_CAP_AUTOSCALE_HYBRID_FAMILY").ok();
        let hybrid_max_core_per_node: Option<u32> =
            env::var("CP_CAP_AUTOSCALE_HYBRID_MAX_CORE_PER_NODE")
                .ok()
                .and_then(|v| v.parse().ok());
        Ok(Autoscaling {
            enabled: env_flag("CP_CAP_AUTOSCALE", false),
            max_additional_hosts: env_or("CP_CAP_AUTOSCALE_WORKERS", 3)?,
            instance_type: env_required("CP_CAP_AUTOSCALE_INSTANCE_TYPE", "instance_size")?,
            instance_disk: env_required("CP_CAP_AUTOSCALE_INSTANCE_DISK", "instance_disk")?
                .parse()
                .map_err(|_| Error::parsing("instance_disk is not a valid integer"))?,
            instance_image: env_required("CP_CAP_AUTOSCALE_INSTANCE_IMAGE", "docker_image")?,
            price_type: env_required("CP_CAP_AUTOSCALE_PRICE_TYPE", "price_type")?
                .parse()
                .map_err(|_| Error::parsing("price_type is not recognized"))?,
            cmd_template: env_or("CP_CAP_AUTOSCALE_CMD_TEMPLATE", "sleep infinity".to_string())?,
            hybrid: env_flag("CP_CAP_AUTOSCALE_HYBRID", false),
            hybrid_family,
            hybrid_max_core_per_node,
            descending: env_flag("CP_CAP_AUTOSCALE_DESCENDING", true),
            scale_up_strategy: env_or(
                "CP_CAP_AUTOSCALE_SCALE_UP_STRATEGY",
                "cpu-capacity".to_string(),
            )?
            .parse()?,
            scale_up_batch_size: env_or("CP_CAP_AUTOSCALE_SCALE_UP_BATCH_SIZE", 1)?,
            scale_down_batch_size: env_or("CP_CAP_AUTOSCALE_SCALE_DOWN_BATCH_SIZE", 1)?,
            scale_up_polling_delay: env_or("CP_CAP_AUTOSCALE_SCALE_UP_POLLING_DELAY", 10)?,
            scale_up_unavailability_delay: env_or(
                "CP_CAP_AUTOSCALE_INSTANCE_UNAVAILABILITY_DELAY",
                1800,
            )?,
            idle_timeout: env_or("CP_CAP_AUTOSCALE_IDLE_TIMEOUT", 30)?,
            scale_up_timeout: 30,
            scale_down_timeout: 30,
            scale_up_polling_timeout: 900,
        })
    }
}

/// Advanced/rarely-touched autoscaling settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AutoscalingAdvanced {
    /// The cloud provider to launch instances in
    pub cloud_provider: CloudProvider,
    /// The region to launch instances in
    pub region_id: String,
    /// The launch-parameter name used to tag a spawned run with its owner
    pub owner_param_name: String,
    /// The working directory to store host-storage files in
    pub work_dir: PathBuf,
    /// The logging task name
    pub log_task: String,
}

impl AutoscalingAdvanced {
    /// Build our advanced settings, falling back to the ambient `CLOUD_PROVIDER`/
    /// `CLOUD_REGION_ID` and a `TMP_DIR`-or-`/tmp` work dir like the original does
    pub fn from_env(queue_name: &str) -> Result<Self, Error> {
        let cloud_provider =
            env_required("CP_CAP_AUTOSCALE_CLOUD_PROVIDER", "CLOUD_PROVIDER")?.parse()?;
        let region_id = env_required("CP_CAP_AUTOSCALE_CLOUD_REGION_ID", "CLOUD_REGION_ID")?;
        let owner_param_name = env_or(
            "CP_CAP_AUTOSCALE_OWNER_PARAMETER_NAME",
            "CP_CAP_AUTOSCALE_OWNER".to_string(),
        )?;
        let default_work_dir = env::var("TMP_DIR").unwrap_or_else(|_| "/tmp".to_string());
        let work_dir = PathBuf::from(env_or("CP_CAP_AUTOSCALE_WORKDIR", default_work_dir)?);
        let default_log_task = format!("GridEngineAutoscaling-{queue_name}");
        let log_task = env_or("CP_CAP_AUTOSCALE_TASK", default_log_task)?;
        Ok(AutoscalingAdvanced {
            cloud_provider,
            region_id,
            owner_param_name,
            work_dir,
            log_task,
        })
    }
}

/// Settings describing the queue this daemon scales for
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Queue {
    /// The name of the Grid Engine queue this daemon scales
    pub name: String,
    /// Whether this queue has a static (non-autoscaled) worker pool
    pub r#static: bool,
    /// Whether this is the default queue (affects job filtering)
    pub default: bool,
    /// The hostgroup/hostlist additional workers are added to
    pub hostlist_name: String,
    /// CPU slots reserved on every worker host
    pub worker_free_cores: u32,
    /// CPU slots reserved on the master host
    pub master_cores: u32,
    /// The name of the GPU consumable resource
    pub gpu_resource_name: String,
    /// The name of the RAM consumable resource
    pub mem_resource_name: String,
}

impl Queue {
    /// Build our queue settings from the `CP_CAP_SGE_*` env vars
    ///
    /// # Arguments
    ///
    /// * `static_hosts_cpus` - The core count to fall back to for `master_cores`,
    ///   matching the original's `CLOUD_PIPELINE_NODE_CORES`-derived default
    pub fn from_env(static_hosts_cpus: u32) -> Result<Self, Error> {
        Ok(Queue {
            name: env_or("CP_CAP_SGE_QUEUE_NAME", "main.q".to_string())?,
            r#static: env_flag("CP_CAP_SGE_QUEUE_STATIC", false),
            default: env_flag("CP_CAP_SGE_QUEUE_DEFAULT", false),
            hostlist_name: env_or("CP_CAP_SGE_HOSTLIST_NAME", "@allhosts".to_string())?,
            worker_free_cores: env_or("CP_CAP_SGE_WORKER_FREE_CORES", 0)?,
            master_cores: env_or("CP_CAP_SGE_MASTER_CORES", static_hosts_cpus)?,
            gpu_resource_name: env_or(
                "CP_CAP_GE_CONSUMABLE_RESOURCE_NAME_GPU",
                "gpus".to_string(),
            )?,
            mem_resource_name: env_or(
                "CP_CAP_GE_CONSUMABLE_RESOURCE_NAME_RAM",
                "ram".to_string(),
            )?,
        })
    }
}

/// Settings for the worker-tagging handler
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tagging {
    /// Seconds of inactivity before the in-use tag is removed
    pub active_timeout: i64,
}

impl Tagging {
    /// Build our tagging settings from `CP_CAP_AUTOSCALE_ACTIVE_TIMEOUT`
    pub fn from_env() -> Result<Self, Error> {
        Ok(Tagging {
            active_timeout: env_or("CP_CAP_AUTOSCALE_ACTIVE_TIMEOUT", 30)?,
        })
    }
}

/// The full autoscaler configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Conf {
    /// Connection info for the cloud pipeline API
    pub connection: Connection,
    /// Logging settings
    pub logging: Logging,
    /// Seconds to sleep between daemon tick iterations
    pub polling_timeout: u64,
    /// Autoscaling settings
    pub autoscaling: Autoscaling,
    /// Advanced autoscaling settings
    pub autoscaling_advanced: AutoscalingAdvanced,
    /// Queue settings
    pub queue: Queue,
    /// Worker tagging settings
    pub tagging: Tagging,
    /// The hostname of the master node, used to derive static worker naming
    pub master_host: String,
    /// The number of statically provisioned hosts to seed at startup
    pub static_hosts_number: u32,
}

impl Conf {
    /// Load the full configuration from the process environment
    ///
    /// This mirrors `main()` in the original: connection settings come from
    /// the ambient `API`/`API_TOKEN`/`RUN_ID` variables, everything else from
    /// the `CP_CAP_*` parameter groups, with the same fallbacks to
    /// non-prefixed variables (`instance_size`, `CLOUD_PROVIDER`, ...) the
    /// original reads when a worker-specific override isn't set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_env_with_override(None)
    }

    /// Load the configuration, overlaying `path`'s `api`/`api_token` keys
    /// over the environment the same way [`Conf::from_env_with_override`] does
    pub fn new(path: &std::path::Path) -> Result<Self, Error> {
        Self::from_env_with_override(Some(path))
    }

    /// Load the configuration from the environment, optionally overlaying a
    /// YAML file that overrides the cloud API connection settings
    ///
    /// Only `connection` is YAML-overridable; every other tunable is a
    /// `CP_CAP_*` parameter and has no business living in a config file,
    /// per [`crate::params`].
    ///
    /// # Arguments
    ///
    /// * `override_path` - An optional path to a YAML file with `api` and/or
    ///   `api_token` keys
    pub fn from_env_with_override(override_path: Option<&std::path::Path>) -> Result<Self, Error> {
        let mut connection = Connection::from_env()?;
        if let Some(path) = override_path {
            let overrides: ConnectionOverride = config::Config::builder()
                .add_source(config::File::from(path).format(config::FileFormat::Yaml))
                .build()?
                .try_deserialize()?;
            if let Some(api) = overrides.api {
                connection.api = api;
            }
            if let Some(api_token) = overrides.api_token {
                connection.api_token = api_token;
            }
        }
        let logging = Logging::from_env();
        let autoscaling = Autoscaling::from_env()?;
        let queue_name = env_or("CP_CAP_SGE_QUEUE_NAME", "main.q".to_string())?;
        let autoscaling_advanced = AutoscalingAdvanced::from_env(&queue_name)?;
        let static_hosts_cpus: u32 = env::var("CLOUD_PIPELINE_NODE_CORES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(num_cpus_fallback);
        let queue = Queue::from_env(static_hosts_cpus)?;
        let tagging = Tagging::from_env()?;
        let master_host = env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("pipeline-{}", connection.run_id));
        let static_hosts_number = env_or("node_count", 0)?;
        Ok(Conf {
            connection,
            logging,
            polling_timeout: 10,
            autoscaling,
            autoscaling_advanced,
            queue,
            tagging,
            master_host,
            static_hosts_number,
        })
    }
}

/// A conservative stand-in for `multiprocessing.cpu_count()` when
/// `CLOUD_PIPELINE_NODE_CORES` isn't set
fn num_cpus_fallback() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
