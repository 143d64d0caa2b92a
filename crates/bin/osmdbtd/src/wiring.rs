//! Construction of the job engine from the loaded configuration.

use std::time::Duration;

use osmdbt_arstotzka::{ArstotzkaMediator, ArstotzkaOptions};
use osmdbt_config::Config;
use osmdbt_object_store::{S3Options, Store, StoreMetrics};
use osmdbt_replication::{
    engine::{EngineMetrics, JobEngine, StagingLayout},
    mediator::{ActionId, ActionUpdate, Mediator, MediatorError, NoopMediator},
    sequence::Sequence,
    staging::LocalStaging,
    tools::{CommandMetrics, OsmdbtRunner, OsmdbtSettings, OsmiumRunner, OsmiumSettings},
};
use prometheus::Registry;

use crate::SetupError;

/// The fully wired production engine.
pub type Engine = JobEngine<LocalStaging, OsmdbtRunner, OsmiumRunner, ServiceMediator>;

/// Builds the engine with all production collaborators, registering its
/// metrics into `registry`.
pub fn build_engine(config: &Config, registry: &Registry) -> Result<Engine, SetupError> {
    let buckets = &config.telemetry.metrics.buckets;

    let store = {
        let storage = &config.object_storage;
        let credentials = storage.credentials.as_ref();
        let options = S3Options {
            endpoint: storage.endpoint.clone(),
            bucket_name: storage.bucket_name.clone(),
            region: storage.region.clone(),
            access_key: credentials.map(|c| c.access_key.clone()),
            secret_key: credentials.map(|c| c.secret_key.clone().into_inner()),
            acl: Some(storage.acl.clone()),
        };
        Store::new(
            osmdbt_object_store::new_s3(&options)?,
            StoreMetrics::register(registry)?,
        )
    };

    let layout = StagingLayout {
        changes_dir: config.osmdbt.changes_dir.clone(),
        log_dir: config.osmdbt.log_dir.clone(),
        run_dir: config.osmdbt.run_dir.clone(),
    };

    let command_metrics =
        CommandMetrics::register(registry, &buckets.osmdbt_command_duration_seconds)?;
    let tools = OsmdbtRunner::new(
        OsmdbtSettings {
            bin_dir: config.osmdbt.bin_dir.clone(),
            config_path: config.osmdbt.config_path.clone(),
            verbose: config.osmdbt.verbose,
            get_log_max_changes: config.osmdbt.get_log_max_changes,
        },
        command_metrics.clone(),
    );
    let inspector = config.app.should_collect_info.then(|| {
        OsmiumRunner::new(
            OsmiumSettings {
                verbose: config.osmium.verbose,
                progress: config.osmium.progress,
            },
            command_metrics,
        )
    });

    let mediator = if config.arstotzka.enabled {
        let options = ArstotzkaOptions {
            url: config.arstotzka.mediator.url.clone(),
            service_id: config.arstotzka.service_id.clone(),
            timeout: Duration::from_secs(config.arstotzka.mediator.timeout_secs),
        };
        ServiceMediator::Arstotzka(ArstotzkaMediator::new(&options)?)
    } else {
        tracing::info!("cross-service coordination is disabled");
        ServiceMediator::Disabled(NoopMediator)
    };

    let engine_metrics = EngineMetrics::register(registry, &buckets.osmdbt_job_duration_seconds)?;

    Ok(JobEngine::new(
        LocalStaging,
        store,
        tools,
        inspector,
        mediator,
        layout,
        engine_metrics,
    ))
}

/// The configured coordinator: the arstotzka client, or a no-op when
/// coordination is disabled.
#[derive(Debug, Clone)]
pub enum ServiceMediator {
    Arstotzka(ArstotzkaMediator),
    Disabled(NoopMediator),
}

impl Mediator for ServiceMediator {
    async fn reserve_access(&self) -> Result<(), MediatorError> {
        match self {
            ServiceMediator::Arstotzka(mediator) => mediator.reserve_access().await,
            ServiceMediator::Disabled(mediator) => mediator.reserve_access().await,
        }
    }

    async fn create_action(&self, state: Sequence) -> Result<ActionId, MediatorError> {
        match self {
            ServiceMediator::Arstotzka(mediator) => mediator.create_action(state).await,
            ServiceMediator::Disabled(mediator) => mediator.create_action(state).await,
        }
    }

    async fn update_action(
        &self,
        action: &ActionId,
        update: ActionUpdate,
    ) -> Result<(), MediatorError> {
        match self {
            ServiceMediator::Arstotzka(mediator) => mediator.update_action(action, update).await,
            ServiceMediator::Disabled(mediator) => mediator.update_action(action, update).await,
        }
    }

    async fn remove_lock(&self) -> Result<(), MediatorError> {
        match self {
            ServiceMediator::Arstotzka(mediator) => mediator.remove_lock().await,
            ServiceMediator::Disabled(mediator) => mediator.remove_lock().await,
        }
    }
}
