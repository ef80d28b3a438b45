//! Check definitions and evaluation rules

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::checker::DEFAULT_PROBE_TIMEOUT;
use crate::probes::{DiskUsageProbe, PingProbe, Probe, Reading};

/// Default minimum time between repeat alerts
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3600);

/// A named health check
#[derive(Clone)]
pub struct Check {
    /// Unique check name, also the state key
    pub name: String,
    /// Measurement source
    pub probe: Arc<dyn Probe>,
    /// Condition that makes the check unhealthy
    pub condition: AlertCondition,
    /// Minimum time between repeat alerts for an ongoing failure
    pub debounce: Duration,
    /// What is being watched, used for alert wording
    pub target: CheckTarget,
    /// Send a notification when the probe itself fails
    pub escalate_probe_errors: bool,
}

impl Check {
    /// Create a new check
    pub fn new(
        name: impl Into<String>,
        probe: Arc<dyn Probe>,
        condition: AlertCondition,
        target: CheckTarget,
    ) -> Self {
        Self {
            name: name.into(),
            probe,
            condition,
            debounce: DEFAULT_DEBOUNCE,
            target,
            escalate_probe_errors: false,
        }
    }

    /// Disk usage check on the filesystem holding `path`
    pub fn disk_usage(host: impl Into<String>, path: impl Into<String>, threshold: u8) -> Self {
        let path = path.into();
        Self::new(
            format!("disk_{}", path),
            Arc::new(DiskUsageProbe::new(path.clone())),
            AlertCondition::UsageAtOrAbove { threshold },
            CheckTarget::Partition {
                host: host.into(),
                path,
            },
        )
    }

    /// Heartbeat check for one host, named `{label}_{address}`
    ///
    /// Ping's deadline fits [`DEFAULT_PROBE_TIMEOUT`]; pair a shorter
    /// supervisor timeout with [`PingProbe::with_deadline`].
    pub fn heartbeat(address: impl Into<String>, label: impl Into<String>) -> Self {
        let address = address.into();
        let label = label.into();
        Self::new(
            format!("{}_{}", label, address),
            Arc::new(
                PingProbe::new(address.clone())
                    .with_deadline(PingProbe::deadline_within(DEFAULT_PROBE_TIMEOUT)),
            ),
            AlertCondition::Unreachable,
            CheckTarget::Host { address, label },
        )
    }

    /// Set debounce interval
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Replace the probe
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    /// Escalate probe failures as notifications
    pub fn with_probe_error_escalation(mut self, enabled: bool) -> Self {
        self.escalate_probe_errors = enabled;
        self
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check")
            .field("name", &self.name)
            .field("probe", &self.probe.describe())
            .field("condition", &self.condition)
            .field("debounce", &self.debounce)
            .field("target", &self.target)
            .field("escalate_probe_errors", &self.escalate_probe_errors)
            .finish()
    }
}

/// The thing a check watches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckTarget {
    /// A partition on the local host
    Partition { host: String, path: String },
    /// A remote host
    Host { address: String, label: String },
}

impl std::fmt::Display for CheckTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckTarget::Partition { host, path } => write!(f, "{} ({})", host, path),
            CheckTarget::Host { address, label } => write!(f, "{} ({})", label, address),
        }
    }
}

/// Condition that makes a check unhealthy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Trigger when disk usage percentage >= threshold
    UsageAtOrAbove { threshold: u8 },
    /// Trigger when the host does not answer
    Unreachable,
}

/// Health of a check after evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Healthy,
    Unhealthy,
}

/// Evaluated reading
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Disk {
        status: Status,
        usage: u8,
        threshold: u8,
    },
    Reachability {
        status: Status,
    },
}

impl Evaluation {
    pub fn status(&self) -> Status {
        match self {
            Evaluation::Disk { status, .. } | Evaluation::Reachability { status } => *status,
        }
    }
}

impl AlertCondition {
    /// Evaluate a reading; `Err` carries why the reading could not be judged
    pub fn evaluate(&self, reading: &Reading) -> Result<Evaluation, String> {
        match self {
            AlertCondition::UsageAtOrAbove { threshold } => {
                let usage = reading
                    .usage_percent()
                    .ok_or_else(|| format!("expected disk usage, got {:?}", reading))?;
                let status = if usage >= *threshold {
                    Status::Unhealthy
                } else {
                    Status::Healthy
                };
                Ok(Evaluation::Disk {
                    status,
                    usage,
                    threshold: *threshold,
                })
            }
            AlertCondition::Unreachable => {
                let reachable = reading
                    .is_reachable()
                    .ok_or_else(|| format!("expected ping statistics, got {:?}", reading))?;
                let status = if reachable {
                    Status::Healthy
                } else {
                    Status::Unhealthy
                };
                Ok(Evaluation::Reachability { status })
            }
        }
    }
}
