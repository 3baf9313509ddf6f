mod checker;
mod config;
mod connector;
mod report;
mod result;
mod runner;

use checker::{CheckerEngine, OsType};
use chrono::Utc;
use clap::Parser;
use config::{CommandMap, Config, HostConfig};
use connector::{CommandChannel, SshConnector};
use report::{ReportGenerator, ReportPayload};
use result::{CheckResult, Summary};
use runner::CommandRunner;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fleetcheck")]
#[command(version)]
#[command(about = "Agentless health checks for Linux/AIX fleets over SSH")]
#[command(group = clap::ArgGroup::new("mode").required(true).args(["host", "batch", "scheduled", "print_default_config"]))]
struct Cli {
    /// Host IP or hostname for a single-host run
    #[arg(long, requires = "username")]
    host: Option<String>,
    /// SSH username
    #[arg(long)]
    username: Option<String>,
    /// SSH password
    #[arg(long)]
    password: Option<String>,
    /// SSH private key file
    #[arg(long)]
    key_file: Option<PathBuf>,
    /// SSH port (defaults to the configured port)
    #[arg(long)]
    port: Option<u16>,
    /// Operating system type of the target host
    #[arg(long, value_enum, default_value_t = OsType::Linux)]
    os_type: OsType,
    /// YAML file with multiple host configurations
    #[arg(long)]
    batch: Option<PathBuf>,
    /// Run recurring sweeps over the given hosts file
    #[arg(long)]
    scheduled: Option<PathBuf>,
    /// Interval between scheduled sweeps (e.g. 30m, 1h)
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    interval: Duration,
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    verbose: bool,
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, thiserror::Error)]
enum HostCheckError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Connector(#[from] connector::ConnectorError),
    #[error(transparent)]
    Command(#[from] runner::CommandError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let exit_code = if let Some(hosts_file) = cli.scheduled.clone() {
        run_scheduled(&cfg, &hosts_file, cli.interval).await
    } else if let Some(hosts_file) = cli.batch.clone() {
        run_batch_mode(&cfg, &hosts_file).await
    } else {
        run_single_mode(&cfg, &cli).await
    };
    std::process::exit(exit_code);
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_single_mode(cfg: &Config, cli: &Cli) -> i32 {
    let host_cfg = HostConfig {
        host: cli.host.clone().unwrap_or_default(),
        username: cli.username.clone().unwrap_or_default(),
        password: cli.password.clone(),
        key_file: cli.key_file.clone(),
        port: cli.port,
        os_type: cli.os_type,
    };

    let payload = {
        let cfg = cfg.clone();
        match tokio::task::spawn_blocking(move || run_single_host(&cfg, &host_cfg)).await {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "host task failed");
                return 1;
            }
        }
    };

    print_summary(&payload);
    0
}

async fn run_batch_mode(cfg: &Config, hosts_file: &Path) -> i32 {
    let hosts = match config::load_hosts_file(hosts_file) {
        Ok(hosts) => hosts,
        Err(err) => {
            error!(error = %err, "failed to load hosts file");
            return 1;
        }
    };

    let payloads = run_batch(cfg, &hosts).await;
    match ReportGenerator::new(&cfg.report)
        .and_then(|generator| generator.generate_batch_report(&payloads))
    {
        Ok(path) => {
            println!("Batch check completed for {} hosts", payloads.len());
            println!("Batch report: {}", path.display());
            0
        }
        Err(err) => {
            error!(error = %err, "failed to generate batch report");
            1
        }
    }
}

async fn run_scheduled(cfg: &Config, hosts_file: &Path, interval: Duration) -> i32 {
    info!(interval = %humantime::format_duration(interval), "starting scheduled health checks");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, stopping scheduled checks");
                return 0;
            }
            _ = ticker.tick() => {
                info!("running scheduled health check");
                if run_batch_mode(cfg, hosts_file).await != 0 {
                    warn!("scheduled sweep finished with errors");
                }
                info!(next_in = %humantime::format_duration(interval), "scheduled check completed");
            }
        }
    }
}

/// Run every host of a batch concurrently, one blocking task per host; each
/// task owns its connector and cache. Results keep the input order.
async fn run_batch(cfg: &Config, hosts: &[HostConfig]) -> Vec<ReportPayload> {
    info!(total_hosts = hosts.len(), "starting batch health check");
    let mut handles = Vec::with_capacity(hosts.len());
    for host_cfg in hosts {
        let cfg = cfg.clone();
        let host_cfg = host_cfg.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            run_single_host(&cfg, &host_cfg)
        }));
    }

    let mut payloads = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(payload) => payloads.push(payload),
            Err(err) => error!(error = %err, "host task failed"),
        }
    }
    payloads
}

/// One host, start to finish. Failures never escape: a host that cannot be
/// checked yields a FAIL payload carrying the error text.
fn run_single_host(cfg: &Config, host_cfg: &HostConfig) -> ReportPayload {
    let host = host_cfg.host.clone();
    let os_type = host_cfg.os_type;
    info!(host = %host, os_type = %os_type, "starting health check");

    match check_host(cfg, host_cfg) {
        Ok((results, summary)) => {
            let report_files = match ReportGenerator::new(&cfg.report).and_then(|generator| {
                generator.generate_report(&host, os_type, &results, &summary, None)
            }) {
                Ok(files) => files,
                Err(err) => {
                    error!(host = %host, error = %err, "report generation failed");
                    BTreeMap::new()
                }
            };
            info!(host = %host, overall_status = %summary.overall_status, "health check completed");
            ReportPayload {
                host,
                os_type,
                timestamp: Utc::now(),
                summary,
                results,
                error: None,
                report_files,
            }
        }
        Err(err) => {
            error!(host = %host, error = %err, "health check failed");
            ReportPayload {
                host,
                os_type,
                timestamp: Utc::now(),
                summary: Summary::failed_run(),
                results: Vec::new(),
                error: Some(err.to_string()),
                report_files: BTreeMap::new(),
            }
        }
    }
}

fn check_host(
    cfg: &Config,
    host_cfg: &HostConfig,
) -> Result<(Vec<CheckResult>, Summary), HostCheckError> {
    host_cfg.validate()?;

    let os_checks = cfg.os_checks(host_cfg.os_type);
    if !os_checks.enabled {
        warn!(host = %host_cfg.host, os_type = %host_cfg.os_type, "checks disabled for this OS type");
        return Ok((Vec::new(), Summary::of(&[])));
    }

    let mut connector = SshConnector::new(host_cfg, &cfg.ssh);
    connector.with_connection(|conn| {
        let channel: &dyn CommandChannel = conn;
        let mut runner = CommandRunner::new(channel, Duration::from_secs(cfg.cache.ttl_secs));
        if let Some(file) = &os_checks.commands_file {
            runner.load_catalog_file(file, host_cfg.os_type)?;
        }
        let commands = resolve_commands(&runner, &os_checks.commands);

        let mut engine = CheckerEngine::new(channel, host_cfg.os_type, commands);
        engine.run_all_checks();
        let results = engine.results().to_vec();
        let summary = engine.summary();
        Ok((results, summary))
    })
}

/// Resolve configured templates against the named-command catalog and log an
/// advisory warning for anything on the destructive denylist.
fn resolve_commands(runner: &CommandRunner, configured: &CommandMap) -> CommandMap {
    CommandMap::from_pairs(configured.iter().map(|(name, command)| {
        let resolved = runner.catalog_command(command).unwrap_or(command).to_string();
        if !CommandRunner::validate_command(&resolved) {
            warn!(check = name, command = %resolved, "configured command matches the destructive denylist");
        }
        (name.to_string(), resolved)
    }))
}

fn print_summary(payload: &ReportPayload) {
    println!("Health check completed for {}", payload.host);
    if let Some(err) = &payload.error {
        println!("Error: {err}");
    }
    println!("Overall status: {}", payload.summary.overall_status);
    println!("Total checks: {}", payload.summary.total);
    println!("Passed: {}", payload.summary.passed);
    println!("Failed: {}", payload.summary.failed);
    println!("Warnings: {}", payload.summary.warning);

    if !payload.report_files.is_empty() {
        println!("\nGenerated reports:");
        for (format, path) in &payload.report_files {
            println!("  {}: {}", format.to_uppercase(), path.display());
        }
    }
}
