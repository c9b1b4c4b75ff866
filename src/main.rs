mod appliance;
mod collector;
mod config;
mod forwarder;
mod metrics;
mod run;
mod snapshot;
#[cfg(test)]
mod test_support;

use appliance::dsm::DsmClient;
use appliance::ApplianceError;
use clap::Parser;
use config::{Config, ConfigError};
use metrics::Metrics;
use run::{RunContext, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_STARTUP_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "synology-collector")]
#[command(version)]
struct Cli {
    /// YAML config file. Without it, settings come from the environment only.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `metrics_textfile` from the config.
    #[arg(long)]
    metrics_textfile: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("не удалось создать клиент DSM: {0}")]
    Appliance(#[from] ApplianceError),
    #[error("не удалось создать HTTP-клиент приёмника: {0}")]
    Ingest(#[from] reqwest::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return ExitCode::SUCCESS;
    }

    let ctx = match build_context(&cli) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!(error = %err, "не удалось запустить сборщик");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    info!(
        appliance = %ctx.config.appliance.host,
        port = ctx.config.appliance.port,
        ingest = %ctx.ingest_url,
        run_timeout = %humantime::format_duration(ctx.config.run_timeout),
        "запуск synology-collector"
    );

    let report = run::run(&ctx).await;
    if let Some(path) = &ctx.config.metrics_textfile {
        export_metrics(path, &report);
    }

    ExitCode::from(report.outcome.exit_code())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_context(cli: &Cli) -> Result<RunContext<DsmClient>, StartupError> {
    let mut cfg = Config::load(cli.config.as_deref().map(Path::new))?;
    if let Some(path) = &cli.metrics_textfile {
        cfg.metrics_textfile = Some(path.clone());
    }

    let ingest_url = cfg.ingest_url()?;
    let appliance = DsmClient::new(&cfg.appliance)?;
    let ingest = forwarder::build_client(cfg.ingest.request_timeout)?;

    Ok(RunContext {
        config: cfg,
        appliance,
        ingest,
        ingest_url,
    })
}

fn export_metrics(path: &Path, report: &RunReport) {
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            warn!(error = %err, "не удалось инициализировать метрики");
            return;
        }
    };
    metrics.record_run(report);
    if let Err(err) = metrics.write_textfile(path) {
        warn!(error = %err, "не удалось записать файл метрик");
    }
}
