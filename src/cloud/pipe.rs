//! Shells out to the `pipe` CLI to launch and stop runs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::cmd::CmdExecutor;
use crate::models::instance::PriceType;
use crate::Error;

/// Launch parameters for a single additional worker run, built fresh for
/// every scale-up attempt
pub struct PipeRunArgs {
    pub instance_disk: u32,
    pub instance_type: String,
    pub instance_image: String,
    pub cmd_template: String,
    pub parent_run_id: String,
    pub price_type: PriceType,
    pub region_id: String,
    pub params: HashMap<String, String>,
}

impl PipeRunArgs {
    /// pipe-cli spells out price types with a dash rather than an underscore
    fn pipe_cli_price_type(&self) -> String {
        self.price_type.to_string().replace('_', "-")
    }

    fn parameters_str(&self) -> String {
        let mut pairs: Vec<(&String, &String)> = self.params.iter().collect();
        pairs.sort_by_key(|(key, _)| key.as_str());
        pairs
            .into_iter()
            .map(|(key, value)| format!("{key} {value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> String {
        format!(
            r#"pipe run --yes --quiet --instance-disk {} --instance-type {} --docker-image {} --cmd-template "{}" --parent-id {} --price-type {} --region-id {} cluster_role worker cluster_role_type additional {}"#,
            self.instance_disk,
            self.instance_type,
            self.instance_image,
            self.cmd_template,
            self.parent_run_id,
            self.pipe_cli_price_type(),
            self.region_id,
            self.parameters_str(),
        )
    }
}

/// Abstracts over [`PipeCli`] so handlers can be tested with a fake
#[async_trait]
pub trait PipeCliApi: Send + Sync {
    /// Launch an additional worker run, returning its run id
    async fn run(&self, args: &PipeRunArgs) -> Result<String, Error>;
    /// Stop a run by id, matching `pipe stop --yes <run_id>`
    async fn stop(&self, run_id: &str) -> Result<(), Error>;
}

/// Wraps the `pipe` CLI calls the autoscaler shells out to
pub struct PipeCli {
    cmd: Arc<dyn CmdExecutor>,
}

impl PipeCli {
    pub fn new(cmd: Arc<dyn CmdExecutor>) -> Self {
        PipeCli { cmd }
    }
}

#[async_trait]
impl PipeCliApi for PipeCli {
    async fn run(&self, args: &PipeRunArgs) -> Result<String, Error> {
        let command = args.command();
        info!(instance_type = %args.instance_type, "launching additional worker");
        let lines = self.cmd.execute_to_lines(&command).await?;
        lines
            .into_iter()
            .next()
            .ok_or_else(|| Error::parsing("`pipe run` produced no run id"))
    }

    async fn stop(&self, run_id: &str) -> Result<(), Error> {
        self.cmd.execute(&format!("pipe stop --yes {run_id}")).await?;
        Ok(())
    }
}
