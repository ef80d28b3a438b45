//! Heartbeat CLI
//!
//! Intended to be run from cron, one pass per invocation:
//!
//! ```text
//! */5 * * * * heartbeat --config /etc/heartbeat.toml run >> /var/log/heartbeat.log 2>&1
//! */5 * * * * heartbeat ping 10.0.0.27 "Sandbox Server" >> /var/log/heartbeat.log 2>&1
//! ```
//!
//! Environment variables:
//! - HEARTBEAT_CONFIG: Path to the TOML config file
//! - HEARTBEAT_SMTP_* / HEARTBEAT_MAIL_*: Mail settings (see `config`)
//! - RUST_LOG: Log level (default: info)
//!
//! Exit status is 0 whenever checks ran, whatever they found; 2 for a bad
//! configuration; 1 when mail or state setup failed before any check ran.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use heartbeat::alerts::{LogNotifier, Notifier, SmtpNotifier, Supervisor};
use heartbeat::config::{CheckConfig, CheckKind, Config, ConfigError};
use heartbeat::state::{AlertStateStore, FileStateStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "heartbeat", version, about = "Health checks with debounced email alerts")]
struct Cli {
    /// TOML config file
    #[arg(long, env = "HEARTBEAT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding alert state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Log alerts instead of sending email
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every check in the config file
    Run,
    /// Alert when a host stops answering ping
    Ping {
        /// Address of the host to monitor
        host_address: String,
        /// Name of the host for identification
        host_label: String,
        #[arg(long, default_value_t = 1)]
        attempts: u32,
        #[arg(long, default_value_t = 3600)]
        debounce_secs: u64,
        /// Also alert when ping itself cannot run
        #[arg(long)]
        escalate_probe_errors: bool,
    },
    /// Alert when a partition reaches a usage threshold
    Disk {
        #[arg(long, default_value = "/")]
        path: String,
        #[arg(long, default_value_t = 80)]
        threshold: u8,
        #[arg(long, default_value_t = 3600)]
        debounce_secs: u64,
    },
    /// List checks that are currently alerting
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heartbeat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Configuration error");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Status => return show_status(&config),
        Command::Run => {
            if config.checks.is_empty() {
                tracing::error!("No checks configured; pass --config or use `ping`/`disk`");
                return ExitCode::from(2);
            }
        }
        Command::Ping {
            host_address,
            host_label,
            attempts,
            debounce_secs,
            escalate_probe_errors,
        } => {
            let mut check = CheckConfig::ping(host_address, host_label).with_debounce_secs(debounce_secs);
            if let CheckKind::Ping { attempts: a, .. } = &mut check.kind {
                *a = attempts;
            }
            check.escalate_probe_errors = escalate_probe_errors;
            config.checks = vec![check];
        }
        Command::Disk {
            path,
            threshold,
            debounce_secs,
        } => {
            config.checks = vec![CheckConfig::disk(path, threshold).with_debounce_secs(debounce_secs)];
        }
    }

    if let Err(e) = config.validate(!cli.dry_run) {
        tracing::error!(error = %e, "Configuration error");
        return ExitCode::from(2);
    }

    let store = match FileStateStore::new(&config.state_dir) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(dir = %config.state_dir.display(), error = %e, "State directory unusable");
            return ExitCode::from(1);
        }
    };

    let notifier: Arc<dyn Notifier> = if cli.dry_run {
        Arc::new(LogNotifier)
    } else {
        match SmtpNotifier::new(&config.mail) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::error!(error = %e, "Mail transport setup failed");
                return ExitCode::from(1);
            }
        }
    };

    let supervisor = Supervisor::new(Arc::new(store), notifier, config.mail.to.clone())
        .with_probe_timeout(config.probe_timeout());

    let checks = config.build_checks();
    let report = supervisor.run_all(&checks).await;

    tracing::info!(
        checks = report.checks.len(),
        alerts = report.alerts_attempted(),
        failures = report.failures().count(),
        "Run complete"
    );

    if report.state_unusable() {
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    config.apply_env()?;

    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }

    Ok(config)
}

fn show_status(config: &Config) -> ExitCode {
    // Read-only: a missing directory means nothing has alerted yet
    let Some(store) = FileStateStore::existing(&config.state_dir) else {
        println!("No checks are alerting.");
        return ExitCode::SUCCESS;
    };

    let states = match store.list() {
        Ok(states) => states,
        Err(e) => {
            tracing::error!(dir = %config.state_dir.display(), error = %e, "Failed to read alert state");
            return ExitCode::from(1);
        }
    };

    if states.is_empty() {
        println!("No checks are alerting.");
        return ExitCode::SUCCESS;
    }

    for state in states {
        println!(
            "{}: alerting since {}, last alert {} ({} sent){}",
            state.check,
            state.first_alert_time.to_rfc3339(),
            state.last_alert_time.to_rfc3339(),
            state.alerts_sent,
            state
                .last_delivery_error
                .map(|e| format!(", last delivery failed: {}", e))
                .unwrap_or_default()
        );
    }

    ExitCode::SUCCESS
}
