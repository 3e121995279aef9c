mod config;

use common::clickhouse::{ClickHouseClient, ClickHouseColumnStore, ColumnStoreRuleStateRepository};
use common::domain::{ArchiveStore, ColumnStore, OutputChannel, RuleStateRepository};
use common::nats::{NatsArchiveStore, NatsClient};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use common::PipelineConfig;
use crate::config::ServiceConfig;
use hyperstream_runner::{AppProcess, Runner};
use ingest_worker::domain::DecoderRegistry;
use ingest_worker::ingest_worker::{IngestWorker, IngestWorkerConfig};
use rule_worker::rule_worker::{RuleWorker, RuleWorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use storage_worker::storage_worker::{StorageWorker, StorageWorkerConfig};
use tracing::{debug, error, info};

struct SharedDependencies {
    pipeline: Arc<PipelineConfig>,
    nats_client: Arc<NatsClient>,
    column_store: Arc<dyn ColumnStore>,
    archive_store: Arc<dyn ArchiveStore>,
}

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
        log_json: config.log_json,
    }) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting hyperstream-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let deps = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };
    let project_id = deps.pipeline.project_id;

    let ingest_worker = match IngestWorker::new(
        Arc::clone(&deps.pipeline),
        Arc::new(DecoderRegistry::standard()),
        Arc::clone(&deps.nats_client),
        IngestWorkerConfig {
            consumer_name: config.consumer_name("ingest", project_id),
            nats_batch_size: config.nats_batch_size,
            nats_batch_wait: config.nats_batch_wait(),
            max_deliver: config.max_deliver(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize ingest worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let repository: Arc<dyn RuleStateRepository> = Arc::new(ColumnStoreRuleStateRepository::new(
        Arc::clone(&deps.column_store),
    ));
    let rule_worker = match RuleWorker::new(
        Arc::clone(&deps.pipeline),
        repository,
        Arc::clone(&deps.nats_client),
        RuleWorkerConfig {
            consumer_name: config.consumer_name("rules", project_id),
            nats_batch_size: config.nats_batch_size,
            nats_batch_wait: config.nats_batch_wait(),
            max_deliver: config.max_deliver(),
            flush_interval: Duration::from_secs(config.rule_state_flush_interval_secs),
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize rule worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let storage_worker = match StorageWorker::new(
        project_id,
        Arc::clone(&deps.column_store),
        Arc::clone(&deps.archive_store),
        Arc::clone(&deps.nats_client),
        StorageWorkerConfig {
            consumer_prefix: config.nats_consumer_prefix.clone(),
            nats_batch_size: config.nats_batch_size,
            nats_batch_wait: config.nats_batch_wait(),
            max_deliver: config.max_deliver(),
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize storage worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let (rule_processes, rule_state_closer) = rule_worker.into_runner_processes();
    let processes: Vec<(&'static str, AppProcess)> = ingest_worker
        .into_runner_processes()
        .into_iter()
        .chain(rule_processes)
        .chain(storage_worker.into_runner_processes())
        .collect();

    let mut runner = Runner::new();
    for (name, process) in processes {
        runner = runner.with_boxed_process(name, process);
    }

    runner
        .with_closer(rule_state_closer)
        .with_closer(move || async move {
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    info!(path = %config.pipeline_config_path, "Loading pipeline configuration...");
    let pipeline = Arc::new(PipelineConfig::from_json_file(&config.pipeline_config_path)?);
    info!(
        project_id = pipeline.project_id,
        packets = pipeline.packet_schemas.len(),
        rules = pipeline.rule_sources.len(),
        "Pipeline configuration loaded"
    );

    info!("Initializing ClickHouse...");
    let clickhouse_client = ClickHouseClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    clickhouse_client.ping().await?;
    let column_store = ClickHouseColumnStore::new(clickhouse_client, &config.clickhouse_table);
    column_store.ensure_schema().await?;

    info!("Initializing NATS...");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );
    for stream in OutputChannel::all_streams() {
        nats_client.ensure_stream(stream).await?;
    }
    let archive_store =
        NatsArchiveStore::new(nats_client.jetstream(), &config.nats_archive_bucket).await?;

    Ok(SharedDependencies {
        pipeline,
        nats_client,
        column_store: Arc::new(column_store),
        archive_store: Arc::new(archive_store),
    })
}
