//! Runtime configuration
//!
//! Loaded from a TOML file, then overridden from `HEARTBEAT_*` environment
//! variables so credentials never need to live in the file:
//!
//! - `HEARTBEAT_STATE_DIR`: directory for alert state (default: ./flags)
//! - `HEARTBEAT_SMTP_SERVER`, `HEARTBEAT_SMTP_PORT`
//! - `HEARTBEAT_SMTP_USER`, `HEARTBEAT_SMTP_PASS`
//! - `HEARTBEAT_MAIL_FROM`, `HEARTBEAT_MAIL_TO`

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::alerts::Check;
use crate::probes::PingProbe;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Host identifier used in disk alerts (default: system hostname)
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS
    #[default]
    Starttls,
    /// Implicit TLS (SMTPS)
    Tls,
    /// No encryption
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    /// Defaults to `disk_{path}` or `{label}_{host}`
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: CheckKind,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default)]
    pub escalate_probe_errors: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    Disk {
        #[serde(default = "default_disk_path")]
        path: String,
        #[serde(default = "default_threshold")]
        threshold: u8,
    },
    Ping {
        host: String,
        label: String,
        #[serde(default = "default_attempts")]
        attempts: u32,
    },
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./flags")
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout_secs() -> u64 {
    30
}

fn default_debounce_secs() -> u64 {
    3600
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_threshold() -> u8 {
    80
}

fn default_attempts() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            probe_timeout_secs: default_probe_timeout_secs(),
            host_id: None,
            mail: MailConfig::default(),
            checks: Vec::new(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: String::new(),
            server: String::new(),
            port: default_smtp_port(),
            username: None,
            password: None,
            tls: TlsMode::default(),
            timeout_secs: default_smtp_timeout_secs(),
        }
    }
}

impl CheckConfig {
    pub fn disk(path: impl Into<String>, threshold: u8) -> Self {
        Self {
            name: None,
            kind: CheckKind::Disk {
                path: path.into(),
                threshold,
            },
            debounce_secs: default_debounce_secs(),
            escalate_probe_errors: false,
        }
    }

    pub fn ping(host: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: CheckKind::Ping {
                host: host.into(),
                label: label.into(),
                attempts: default_attempts(),
            },
            debounce_secs: default_debounce_secs(),
            escalate_probe_errors: false,
        }
    }

    pub fn with_debounce_secs(mut self, secs: u64) -> Self {
        self.debounce_secs = secs;
        self
    }

    /// Effective check name
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            CheckKind::Disk { path, .. } => format!("disk_{}", path),
            CheckKind::Ping { host, label, .. } => format!("{}_{}", label, host),
        }
    }

    /// Build the runnable check
    ///
    /// Ping is given a deadline that ends inside `probe_timeout`, so a silent
    /// host reads as unreachable rather than as a timed-out probe.
    pub fn build(&self, host_id: &str, probe_timeout: Duration) -> Check {
        let check = match &self.kind {
            CheckKind::Disk { path, threshold } => Check::disk_usage(host_id, path.clone(), *threshold),
            CheckKind::Ping {
                host,
                label,
                attempts,
            } => {
                let probe = PingProbe::new(host.clone())
                    .with_attempts(*attempts)
                    .with_deadline(PingProbe::deadline_within(probe_timeout));
                Check::heartbeat(host.clone(), label.clone()).with_probe(std::sync::Arc::new(probe))
            }
        };

        let mut check = check
            .with_debounce(Duration::from_secs(self.debounce_secs))
            .with_probe_error_escalation(self.escalate_probe_errors);
        check.name = self.resolved_name();
        check
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid config format: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Validation(String),
}

impl Config {
    /// Read and parse a TOML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `HEARTBEAT_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("HEARTBEAT_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(server) = lookup("HEARTBEAT_SMTP_SERVER") {
            self.mail.server = server;
        }
        if let Some(port) = lookup("HEARTBEAT_SMTP_PORT") {
            self.mail.port = port.parse().map_err(|_| {
                ConfigError::Validation(format!("HEARTBEAT_SMTP_PORT is not a port: {}", port))
            })?;
        }
        if let Some(user) = lookup("HEARTBEAT_SMTP_USER") {
            self.mail.username = Some(user);
        }
        if let Some(pass) = lookup("HEARTBEAT_SMTP_PASS") {
            self.mail.password = Some(pass);
        }
        if let Some(from) = lookup("HEARTBEAT_MAIL_FROM") {
            self.mail.from = from;
        }
        if let Some(to) = lookup("HEARTBEAT_MAIL_TO") {
            self.mail.to = to;
        }
        Ok(())
    }

    /// Check values; mail settings are only required when mail is sent
    pub fn validate(&self, require_mail: bool) -> Result<(), ConfigError> {
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "probe_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if require_mail {
            for (name, value) in [
                ("mail.from", &self.mail.from),
                ("mail.to", &self.mail.to),
                ("mail.server", &self.mail.server),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Validation(format!("{} must be set", name)));
                }
            }

            if self.mail.port == 0 {
                return Err(ConfigError::Validation(
                    "mail.port must be greater than 0".to_string(),
                ));
            }
        }

        let mut names = HashSet::new();

        for check in &self.checks {
            let name = check.resolved_name();

            if name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "check names must not be empty".to_string(),
                ));
            }

            if !names.insert(name.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate check name: {}",
                    name
                )));
            }

            match &check.kind {
                CheckKind::Disk { path, threshold } => {
                    if *threshold > 100 {
                        return Err(ConfigError::Validation(format!(
                            "{}: threshold must be between 0 and 100",
                            name
                        )));
                    }
                    if !Path::new(path).is_absolute() {
                        return Err(ConfigError::Validation(format!(
                            "{}: path must be absolute",
                            name
                        )));
                    }
                }
                CheckKind::Ping { host, attempts, .. } => {
                    if host.trim().is_empty() {
                        return Err(ConfigError::Validation(format!(
                            "{}: host must be set",
                            name
                        )));
                    }
                    if *attempts == 0 {
                        return Err(ConfigError::Validation(format!(
                            "{}: attempts must be greater than 0",
                            name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Configured host identifier, else the system hostname
    pub fn host_id(&self) -> String {
        self.host_id
            .clone()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Build every configured check
    pub fn build_checks(&self) -> Vec<Check> {
        let host_id = self.host_id();
        let probe_timeout = self.probe_timeout();
        self.checks
            .iter()
            .map(|c| c.build(&host_id, probe_timeout))
            .collect()
    }
}
