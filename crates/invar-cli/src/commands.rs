use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use invar_api::StaticAuthenticator;
use invar_config::Config;
use invar_domain::{Context, StateDetails, TaskState};
use invar_reconciler::Reconciler;
use invar_store::{InMemoryStore, NewHardware, PgStore, Store};
use invar_worker::DriverRegistry;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Failures split by exit code: configuration errors exit 2, everything
/// else that prevents startup exits 1.
pub enum CliError {
    Config(anyhow::Error),
    Startup(anyhow::Error),
}

fn startup(e: impl Into<anyhow::Error>) -> CliError {
    CliError::Startup(e.into())
}

fn build_registry(config: &Config) -> Result<Arc<DriverRegistry>, CliError> {
    DriverRegistry::from_config(config)
        .map(Arc::new)
        .map_err(|e| CliError::Config(e.into()))
}

async fn build_store(
    config: &Config,
    registry: Arc<DriverRegistry>,
) -> Result<Arc<dyn Store>, CliError> {
    let url = &config.database.connection;
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PgStore::connect(url, registry)
            .await
            .context("failed to connect to the database")
            .map_err(CliError::Startup)?;
        Ok(Arc::new(store))
    } else if url.starts_with("memory://") {
        info!("using in-memory store — state will be lost on process exit");
        Ok(Arc::new(InMemoryStore::new(registry)))
    } else {
        Err(CliError::Config(anyhow::anyhow!(
            "unsupported database connection URL: {url}"
        )))
    }
}

// ── serve-api ─────────────────────────────────────────────────────────────────

pub async fn serve_api(config: Config) -> Result<(), CliError> {
    if config.api.enable_ssl_api {
        return Err(CliError::Config(anyhow::anyhow!(
            "enable_ssl_api is not supported by the built-in server; terminate TLS in front of it"
        )));
    }

    let registry = build_registry(&config)?;
    let store = build_store(&config, registry.clone()).await?;
    let authenticator = Arc::new(StaticAuthenticator::from_config(&config.auth));

    let app = invar_api::build_app(store, registry, authenticator, config.api.max_limit)
        .map_err(|e| CliError::Startup(e.into()))?;
    let addr = format!("{}:{}", config.api.host_ip, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))
        .map_err(CliError::Startup)?;
    info!(addr = %addr, "serving hardware API");

    axum::serve(listener, app)
        .await
        .context("server error")
        .map_err(CliError::Startup)
}

// ── serve-worker ──────────────────────────────────────────────────────────────

pub async fn serve_worker(config: Config) -> Result<(), CliError> {
    let registry = build_registry(&config)?;
    let store = build_store(&config, registry.clone()).await?;

    let reconciler = Arc::new(Reconciler::new(
        store,
        registry,
        config.worker.task_pool_size,
        config.worker.task_concurrency,
    ));
    let interval = Duration::from_secs(config.worker.process_pending_task_interval);
    info!(
        host = %config.host,
        interval_secs = config.worker.process_pending_task_interval,
        "starting reconciler"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn({
        let reconciler = reconciler.clone();
        async move {
            reconciler
                .run(&Context::admin(), interval, shutdown_rx)
                .await;
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")
        .map_err(CliError::Startup)?;
    info!("shutdown requested, draining in-flight tasks");
    let _ = shutdown_tx.send(true);
    runner.await.context("reconciler task failed").map_err(CliError::Startup)
}

// ── import ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Discovered {
    name: Option<String>,
    hardware_type: String,
    properties: StateDetails,
}

/// Merge every enabled worker's `import_existing` output by hardware UUID
/// and enroll the results with their tasks already STEADY ("already synced
/// externally").
pub async fn import(config: Config, dry_run: bool, project_id: String) -> Result<(), CliError> {
    let registry = build_registry(&config)?;
    let store = build_store(&config, registry.clone()).await?;
    let context = Context::admin();

    let mut discovered: HashMap<Uuid, Discovered> = HashMap::new();
    for (hwt_name, hwt) in registry.hardware_types() {
        for worker_name in hwt.enabled_workers() {
            let Ok(worker) = registry.worker(worker_name) else {
                debug!(worker = %worker_name, hardware_type = %hwt_name, "worker not enabled");
                continue;
            };
            let items = worker
                .import_existing(&context)
                .await
                .with_context(|| format!("import from worker {worker_name} failed"))
                .map_err(CliError::Startup)?;
            info!(
                worker = %worker_name,
                count = items.len(),
                "discovered existing hardware"
            );
            for item in items {
                let uuid = item.uuid.unwrap_or_else(Uuid::new_v4);
                let entry = discovered.entry(uuid).or_default();
                if entry.name.is_none() {
                    entry.name = item.name;
                }
                entry.hardware_type = hwt_name.clone();
                for (key, value) in item.properties {
                    entry.properties.insert(key, value);
                }
            }
        }
    }

    for (uuid, entry) in discovered {
        let name = entry.name.unwrap_or_else(|| uuid.to_string());
        println!("Registering {name} ({uuid}) as {}", entry.hardware_type);
        if dry_run {
            continue;
        }
        store
            .create_hardware(
                NewHardware {
                    uuid: Some(uuid),
                    name,
                    project_id: project_id.clone(),
                    hardware_type: entry.hardware_type,
                    properties: entry.properties,
                },
                TaskState::Steady,
            )
            .await
            .map_err(startup)?;
    }
    Ok(())
}
