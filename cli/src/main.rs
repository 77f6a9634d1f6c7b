use clap::Parser;
mod app;
mod commands;
use commands::cli;
use taskmux_core::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let mut cfg =
        taskmux_core::config::load_default().map_err(|e| error::CliError::Config(e.to_string()))?;
    if let Some(kind) = &args.backend {
        cfg.backend_kind = kind.to_string();
    }
    init_tracing(&cfg.logging).map_err(error::CliError::Command)?;

    match args.command {
        cli::Commands::Run(run_args) => commands::run::run(cfg, run_args).await,
        cli::Commands::Tasks(tasks_args) => commands::tasks::run(cfg, tasks_args).await,
    }
}

fn init_tracing(cfg: &taskmux_core::config::LoggingConfig) -> Result<(), String> {
    if !cfg.enabled {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cfg.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = cfg.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let file_layer = if cfg.file {
        let directory = cfg
            .directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().to_string_lossy().to_string());
        let appender = tracing_appender::rolling::daily(directory, "taskmux.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
    } else {
        None
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| format!("tracing init failed: {e}"))
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    match e {
        error::CliError::Config(_) => 2,
        _ => 1,
    }
}
