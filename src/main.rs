use std::sync::Arc;

use clap::Parser;
use tracing::info;

use ge_autoscaler::args::Args;
use ge_autoscaler::autoscaler::Autoscaler;
use ge_autoscaler::cloud::{CloudPipelineInstanceProvider, PipeCli, PipeCliApi, PipelineClient};
use ge_autoscaler::cmd::{CmdExecutor, ShellCmdExecutor};
use ge_autoscaler::daemon::Daemon;
use ge_autoscaler::grid_engine::GridEngine;
use ge_autoscaler::host_storage::{FileSystemHostStorage, HostStorage, ThreadSafeHostStorage};
use ge_autoscaler::instances::provider::{
    extract_family, AvailableInstanceProvider, DefaultInstanceProvider, DescendingInstanceProvider,
    FamilyInstanceProvider, InstanceProvider, SizeLimitingInstanceProvider,
};
use ge_autoscaler::instances::selector::{
    BackwardCompatibleInstanceSelector, CpuCapacityInstanceSelector, InstanceSelector,
    NaiveCpuCapacityInstanceSelector,
};
use ge_autoscaler::launch_params::fetch_instance_launch_params;
use ge_autoscaler::models::instance::PriceType;
use ge_autoscaler::models::resource::ResourceSupply;
use ge_autoscaler::params::print_params;
use ge_autoscaler::scale_down::handler::ScaleDownHandler;
use ge_autoscaler::scale_down::orchestrator::ScaleDownOrchestrator;
use ge_autoscaler::scale_up::handler::ScaleUpHandler;
use ge_autoscaler::scale_up::orchestrator::ScaleUpOrchestrator;
use ge_autoscaler::worker_recorder::{CloudPipelineWorkerRecorder, WorkerRecorder};
use ge_autoscaler::worker_tags::WorkerTagsHandler;
use ge_autoscaler::worker_validator::WorkerValidator;
use ge_autoscaler::{conf::ScaleUpStrategy, trace, Conf, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    if args.list_params {
        print_params();
        return Ok(());
    }

    let mut conf = Conf::new(&args.config)?;
    trace::setup(&conf.autoscaling_advanced.log_task, &conf.logging);

    // workers never recursively autoscale, so a disabled queue simply has
    // no additional hosts to scale up into
    if !conf.autoscaling.enabled {
        conf.autoscaling.max_additional_hosts = 0;
    }

    let default_hostfile = std::env::var("DEFAULT_HOSTFILE")
        .map_err(|_| Error::new("DEFAULT_HOSTFILE is not set"))?;
    let default_hostfile = std::path::PathBuf::from(default_hostfile);
    let static_instance_type =
        std::env::var("instance_size").unwrap_or_else(|_| conf.autoscaling.instance_type.clone());
    let static_hosts_enabled = conf.queue.r#static && conf.static_hosts_number > 0;

    let cmd: Arc<dyn CmdExecutor> = Arc::new(ShellCmdExecutor);
    let api = Arc::new(PipelineClient::new(
        conf.connection.api.clone(),
        conf.connection.api_token.clone(),
    )?);
    api.load_preferences(&mut conf.autoscaling).await;
    let pipe: Arc<dyn PipeCliApi> = Arc::new(PipeCli::new(cmd.clone()));

    let instance_launch_params = fetch_instance_launch_params(
        &api,
        &conf.connection.run_id,
        &conf.queue.name,
        &conf.queue.hostlist_name,
    )
    .await;

    let grid_engine = Arc::new(GridEngine::new(
        cmd.clone(),
        conf.queue.name.clone(),
        conf.queue.hostlist_name.clone(),
        conf.queue.default,
        conf.queue.gpu_resource_name.clone(),
        conf.queue.mem_resource_name.clone(),
    ));

    let reserved_supply = ResourceSupply::new(conf.queue.worker_free_cores, 0, 0);

    let worker_recorder_impl = Arc::new(CloudPipelineWorkerRecorder::new(api.clone()));
    let worker_recorder: Arc<dyn WorkerRecorder> = worker_recorder_impl.clone();

    let spot = conf.autoscaling.price_type == PriceType::Spot;
    let cloud_instance_provider: Arc<dyn InstanceProvider> = Arc::new(CloudPipelineInstanceProvider::new(
        api.clone(),
        conf.autoscaling_advanced.region_id.clone(),
        spot,
    ));
    let default_instance_provider: Arc<dyn InstanceProvider> = Arc::new(DefaultInstanceProvider {
        inner: cloud_instance_provider.clone(),
        instance_type: conf.autoscaling.instance_type.clone(),
    });
    let static_instance_provider: Arc<dyn InstanceProvider> = Arc::new(DefaultInstanceProvider {
        inner: cloud_instance_provider.clone(),
        instance_type: static_instance_type.clone(),
    });

    let descending_instance = default_instance_provider.provide().await?.into_iter().last();
    let descending_instance_cores = descending_instance.as_ref().map(|i| i.cpu).unwrap_or(0);
    let descending_instance_family = descending_instance
        .as_ref()
        .and_then(|i| extract_family(conf.autoscaling_advanced.cloud_provider, &i.name));

    let instance_provider: Arc<dyn InstanceProvider> = if conf.autoscaling.hybrid
        && conf.autoscaling.hybrid_family.is_some()
    {
        let family = conf.autoscaling.hybrid_family.clone().unwrap();
        info!(family, "using hybrid autoscaling");
        let mut provider: Arc<dyn InstanceProvider> = Arc::new(FamilyInstanceProvider {
            inner: cloud_instance_provider.clone(),
            cloud_provider: conf.autoscaling_advanced.cloud_provider,
            family,
        });
        if let Some(max_cores) = conf.autoscaling.hybrid_max_core_per_node {
            if max_cores > 0 {
                provider = Arc::new(SizeLimitingInstanceProvider {
                    inner: provider,
                    max_instance_cores: max_cores,
                });
            }
        }
        if conf.autoscaling.scale_up_unavailability_delay > 0 {
            provider = Arc::new(AvailableInstanceProvider {
                inner: provider,
                records: worker_recorder_impl.records_handle(),
                unavailability_delay: chrono::Duration::seconds(conf.autoscaling.scale_up_unavailability_delay),
            });
        }
        provider
    } else if conf.autoscaling.descending && descending_instance_family.is_some() && descending_instance_cores > 0 {
        let family = descending_instance_family.unwrap();
        info!(
            instance_type = descending_instance.as_ref().map(|i| i.name.as_str()).unwrap_or(""),
            "using descending autoscaling"
        );
        let mut provider: Arc<dyn InstanceProvider> = Arc::new(FamilyInstanceProvider {
            inner: cloud_instance_provider.clone(),
            cloud_provider: conf.autoscaling_advanced.cloud_provider,
            family,
        });
        provider = Arc::new(SizeLimitingInstanceProvider {
            inner: provider,
            max_instance_cores: descending_instance_cores,
        });
        if conf.autoscaling.scale_up_unavailability_delay > 0 {
            provider = Arc::new(AvailableInstanceProvider {
                inner: provider,
                records: worker_recorder_impl.records_handle(),
                unavailability_delay: chrono::Duration::seconds(conf.autoscaling.scale_up_unavailability_delay),
            });
        }
        Arc::new(DescendingInstanceProvider { inner: provider })
    } else {
        info!(instance_type = %conf.autoscaling.instance_type, "using default autoscaling");
        default_instance_provider.clone()
    };

    let instance_selector: Arc<dyn InstanceSelector> = match conf.autoscaling.scale_up_strategy {
        ScaleUpStrategy::CpuCapacity => Arc::new(CpuCapacityInstanceSelector {
            provider: instance_provider.clone(),
            reserved_supply: reserved_supply.clone(),
        }),
        ScaleUpStrategy::NaiveCpuCapacity => Arc::new(NaiveCpuCapacityInstanceSelector {
            inner: CpuCapacityInstanceSelector {
                provider: instance_provider.clone(),
                reserved_supply: reserved_supply.clone(),
            },
        }),
        ScaleUpStrategy::BackwardCompatible => Arc::new(BackwardCompatibleInstanceSelector::new(
            instance_provider.clone(),
            reserved_supply.clone(),
            conf.autoscaling.scale_up_batch_size,
        )),
    };

    let biggest_instance = instance_provider
        .provide()
        .await?
        .into_iter()
        .max_by_key(|instance| instance.cpu);
    let static_instance = static_instance_provider.provide().await?.into_iter().last();

    let biggest_instance_supply = ResourceSupply {
        resources: biggest_instance
            .map(|instance| instance.supply().resources)
            .unwrap_or_default()
            .saturating_sub(&reserved_supply.resources),
        owner: None,
    };
    let static_instance_supply = ResourceSupply {
        resources: static_instance
            .map(|instance| instance.supply().resources)
            .unwrap_or_default()
            .saturating_sub(&reserved_supply.resources),
        owner: None,
    };
    let effective_master_cpu = if conf.queue.master_cores > conf.queue.worker_free_cores {
        conf.queue.master_cores - conf.queue.worker_free_cores
    } else {
        conf.queue.master_cores
    };
    let master_instance_supply = ResourceSupply::new(
        effective_master_cpu,
        static_instance_supply.resources.gpu,
        static_instance_supply.resources.mem,
    );

    let mut cluster_max_supply = ResourceSupply {
        resources: biggest_instance_supply.resources * conf.autoscaling.max_additional_hosts,
        owner: None,
    };
    if conf.queue.r#static {
        cluster_max_supply = cluster_max_supply
            + master_instance_supply
            + ResourceSupply {
                resources: static_instance_supply.resources * conf.static_hosts_number,
                owner: None,
            };
    }

    let host_storage: Arc<dyn HostStorage> = Arc::new(ThreadSafeHostStorage::new(FileSystemHostStorage::new(
        cmd.clone(),
        conf.autoscaling_advanced
            .work_dir
            .join(format!(".autoscaler.{}.storage", conf.queue.name)),
    )));
    let static_host_storage: Arc<dyn HostStorage> = Arc::new(FileSystemHostStorage::new(
        cmd.clone(),
        conf.autoscaling_advanced
            .work_dir
            .join(format!(".static.{}.storage", conf.queue.name)),
    ));

    let worker_tags_handler = Arc::new(WorkerTagsHandler::new(
        api.clone(),
        host_storage.clone(),
        static_host_storage.clone(),
        conf.tagging.active_timeout,
    ));

    let scale_up_handler = Arc::new(ScaleUpHandler::new(
        cmd.clone(),
        api.clone(),
        pipe.clone(),
        grid_engine.clone(),
        host_storage.clone(),
        conf.connection.run_id.clone(),
        conf.autoscaling.instance_disk,
        conf.autoscaling.instance_image.clone(),
        conf.autoscaling.cmd_template.clone(),
        conf.autoscaling.price_type,
        conf.autoscaling_advanced.region_id.clone(),
        conf.autoscaling_advanced.owner_param_name.clone(),
        conf.autoscaling.scale_up_polling_delay,
        conf.autoscaling.scale_up_polling_timeout,
        instance_launch_params,
    ));
    let scale_up_orchestrator = Arc::new(ScaleUpOrchestrator::new(
        scale_up_handler,
        grid_engine.clone(),
        host_storage.clone(),
        static_host_storage.clone(),
        worker_tags_handler.clone(),
        instance_selector,
        worker_recorder,
        conf.autoscaling.scale_up_batch_size,
        conf.autoscaling.scale_up_polling_delay,
    ));

    let scale_down_handler = Arc::new(ScaleDownHandler::new(cmd.clone(), pipe.clone(), grid_engine.clone()));
    let scale_down_orchestrator = Arc::new(ScaleDownOrchestrator::new(
        scale_down_handler.clone(),
        grid_engine.clone(),
        host_storage.clone(),
        conf.autoscaling.scale_down_batch_size,
    ));

    let worker_validator = Arc::new(WorkerValidator::new(
        grid_engine.clone(),
        api.clone(),
        pipe.clone(),
        host_storage.clone(),
        scale_down_handler,
    ));

    let autoscaler = Arc::new(Autoscaler::new(
        grid_engine,
        host_storage,
        static_host_storage.clone(),
        scale_up_orchestrator,
        scale_down_orchestrator,
        conf.autoscaling.scale_up_timeout,
        conf.autoscaling.scale_down_timeout,
        conf.autoscaling.idle_timeout,
        conf.autoscaling.max_additional_hosts,
        biggest_instance_supply,
        cluster_max_supply,
    ));

    let daemon = Daemon::new(
        autoscaler,
        worker_validator,
        worker_tags_handler,
        static_host_storage,
        conf.polling_timeout,
    );
    daemon
        .bootstrap(
            &default_hostfile,
            &conf.master_host,
            static_hosts_enabled,
            chrono::Duration::seconds(conf.tagging.active_timeout),
        )
        .await;
    daemon.run().await;
    Ok(())
}
