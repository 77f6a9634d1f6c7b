//! Engine assembly: drivers, coordinator, registry and persistence wired
//! from one loaded config.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use taskmux_core::api as core;
use taskmux_core::error::CliError;
use tokio::sync::mpsc;

pub struct Engine {
    pub registry: core::TaskRegistry,
    pub coordinator: core::ProcessCoordinator,
    pub persistence: core::PersistenceManager,
    pub events_out: Option<core::EventsOutTx>,
    pub task_events: mpsc::UnboundedReceiver<core::TaskEvent>,
    pub config: core::AppConfig,
}

pub async fn build_engine(cfg: core::AppConfig) -> Result<Engine, CliError> {
    let backend_kind = core::BackendKind::from_str(&cfg.backend_kind)
        .map_err(CliError::Config)?;

    let sdk_driver: Arc<dyn core::BackendDriver> = Arc::new(core::SdkDriver::new(cfg.sdk.clone()));
    let cli_driver: Arc<dyn core::BackendDriver> = Arc::new(core::CliDriver::new(cfg.cli.clone()));

    let registry = core::TaskRegistry::new();
    let (coordinator, task_events) =
        core::ProcessCoordinator::new(sdk_driver, cli_driver, backend_kind, &cfg.control);

    let data_dir = cfg
        .persistence
        .directory
        .clone()
        .ok_or_else(|| CliError::Config("persistence directory unset".to_string()))?;
    let persistence = core::PersistenceManager::new(
        data_dir,
        registry.clone(),
        Duration::from_millis(cfg.persistence.save_debounce_ms),
    );
    let report = persistence.load().await?;
    if report.active > 0 || report.archived > 0 {
        tracing::info!(
            "loaded {} active and {} archived tasks ({} migrated)",
            report.active,
            report.archived,
            report.migrated
        );
    }

    let events_out = core::start_events_out(&cfg.events_out)
        .await
        .map_err(CliError::Command)?;

    Ok(Engine {
        registry,
        coordinator,
        persistence,
        events_out,
        task_events,
        config: cfg,
    })
}
