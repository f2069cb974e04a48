/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for Syn-Pilot Core. Drains the queued composer
    update tasks, or serves the bridge layer with task
    registration and package version inspection.

  Security / Safety Notes:
    Operates within scheduler-user privileges. Executes
    composer/php commands and performs HTTPS requests only.

  Dependencies:
    clap for CLI parsing, chrono for timestamps.

  Operational Scope:
    Invoked by the host scheduler (cron) for queue drains and
    by the Syn-Pilot bridge for registration and inspection.

  Revision History:
    2025-06-21 COD  Authored Syn-Pilot Core runtime.
    2025-07-02 COD  Added plugin-code registration for the
                    bridge layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI and config file
============================================================*/

mod composer;
mod config;
mod error;
mod logger;
mod marketplace;
mod packagist;
mod platform;
mod queue;
mod resolver;
mod runner;
mod updater;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, Parser};

use composer::Composer;
use config::SynpilotConfig;
use error::{Result, SynpilotError};
use logger::Logger;
use marketplace::MarketplaceClient;
use platform::{ArtisanMigrator, FileSettingsStore};
use queue::TaskQueue;
use resolver::Resolver;
use runner::QueueRunner;
use updater::UpdateManager;

/// Command-line arguments for Syn-Pilot-Core.
#[derive(Debug, Parser)]
#[command(
    name = "Syn-Pilot-Core",
    version,
    author = "Synavera Systems",
    about = "Composer update pilot for managed October CMS sites"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,
    /// Register an update task for these packages instead of draining.
    #[arg(long = "register", value_name = "PKG", action = ArgAction::Append)]
    register: Vec<String>,
    /// Register an update task for these plugin codes; codes resolve
    /// through the marketplace before the task is queued.
    #[arg(long = "register-plugin", value_name = "CODE", action = ArgAction::Append)]
    register_plugins: Vec<String>,
    /// Correlation id for registration.
    #[arg(long, value_name = "UUID")]
    uuid: Option<String>,
    /// Callback URL for registration.
    #[arg(long, value_name = "URL")]
    callback: Option<String>,
    /// Inspect upgrade data for these packages instead of draining.
    #[arg(long = "package", value_name = "PKG", action = ArgAction::Append)]
    packages: Vec<String>,
    /// Do not execute; list pending tasks only.
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,
    /// Enable verbose logging to stderr.
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

impl Cli {
    fn wants_registration(&self) -> bool {
        !self.register.is_empty() || !self.register_plugins.is_empty()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[Syn-Pilot-Core] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.wants_registration() && !cli.packages.is_empty() {
        return Err(SynpilotError::Config(
            "Cannot combine registration with --package inspection".into(),
        ));
    }

    let config_path = cli.config.as_deref();
    let config = SynpilotConfig::load_from_optional_path(config_path)?;

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .or_else(|| Some(config.log_dir().join(format!("core_{session_stamp}.log"))));
    let logger = Arc::new(Logger::new(log_path, cli.verbose)?);
    logger.info("INIT", "Syn-Pilot Core awakening.");

    if cli.wants_registration() {
        let code = register_task(&cli, &config, logger.clone()).await?;
        logger.finalize()?;
        return Ok(code);
    }

    if !cli.packages.is_empty() {
        let code = inspect_packages(&cli, &config, logger.clone()).await?;
        logger.finalize()?;
        return Ok(code);
    }

    let queue = TaskQueue::at(config.queue_path());

    if cli.dry_run {
        let tasks = queue.get_tasks();
        println!("→ Queue dry-run. Pending tasks={}", tasks.len());
        for task in &tasks {
            println!("  {} → {}", task.uuid, task.packages.join(", "));
        }
        logger.finalize()?;
        return Ok(ExitCode::SUCCESS);
    }

    let manager = build_manager(&config, logger.clone())?;
    let runner = QueueRunner::new(queue, manager, &config.callback, logger.clone())?;
    let summary = runner.run().await?;

    logger.info(
        "SUMMARY",
        format!(
            "tasks={} succeeded={} failed={}",
            summary.processed, summary.succeeded, summary.failed
        ),
    );
    logger.info("COMPLETE", "Pilot duties discharged.");
    logger.finalize()?;

    Ok(ExitCode::SUCCESS)
}

fn build_manager(config: &SynpilotConfig, logger: Arc<Logger>) -> Result<UpdateManager> {
    let composer = Composer::new(
        &config.composer,
        config.project_root.clone(),
        logger.clone(),
    );

    Ok(UpdateManager::new(
        composer,
        Arc::new(MarketplaceClient::new(&config.marketplace)?),
        Arc::new(ArtisanMigrator::new(config.project_root.clone())),
        Arc::new(FileSettingsStore::new(
            config.project_root.join("storage/framework/synpilot_build"),
        )),
        logger,
    ))
}

/// Queue a task for the scheduler. Plugin codes are resolved through
/// the marketplace first so an unresolvable request fails here, at
/// the bridge boundary, rather than inside the cron run.
async fn register_task(
    cli: &Cli,
    config: &SynpilotConfig,
    logger: Arc<Logger>,
) -> Result<ExitCode> {
    let uuid = cli
        .uuid
        .clone()
        .ok_or_else(|| SynpilotError::Config("Registration requires --uuid".into()))?;
    let callback = cli
        .callback
        .clone()
        .ok_or_else(|| SynpilotError::Config("Registration requires --callback".into()))?;

    let mut packages = cli.register.clone();

    if !cli.register_plugins.is_empty() {
        let manager = build_manager(config, logger.clone())?;
        packages.extend(
            manager
                .composer_packages_from_plugin_codes(&cli.register_plugins)
                .await,
        );
    }

    if packages.is_empty() {
        return Err(SynpilotError::PluginNotFound);
    }

    let queue = TaskQueue::at(config.queue_path());
    queue.register_task(packages.clone(), uuid.clone(), callback)?;

    logger.info(
        "REGISTER",
        format!("Task {uuid} queued for {}", packages.join(", ")),
    );
    println!(
        "→ Task registered. uuid={} packages={}",
        uuid,
        packages.join(", ")
    );

    Ok(ExitCode::SUCCESS)
}

async fn inspect_packages(
    cli: &Cli,
    config: &SynpilotConfig,
    logger: Arc<Logger>,
) -> Result<ExitCode> {
    let resolver = Resolver::new(&config.project_root, &config.registry, logger.clone())?;

    let mut statuses = Vec::new();
    for name in &cli.packages {
        match resolver.get_package(name).await {
            Some(status) => statuses.push(status),
            None => {
                logger.warn("PKG404", format!("Package not installed: {name}"));
            }
        }
    }

    let document = serde_json::to_string_pretty(&statuses).map_err(|err| {
        SynpilotError::Serialization(format!("Failed to encode package report: {err}"))
    })?;
    println!("{document}");

    Ok(ExitCode::SUCCESS)
}
