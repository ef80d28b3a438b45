//! Check supervisor: probe, evaluate, debounce, notify

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::config::{Check, CheckTarget, Evaluation, Status};
use super::debounce::{decide, Decision};
use super::notifier::{Notification, Notifier, Priority};
use crate::clock::{Clock, SystemClock};
use crate::probes::{ProbeError, Reading};
use crate::state::{AlertState, AlertStateStore, StateError};

/// Default bound on a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs checks once per invocation and owns their alert state
pub struct Supervisor {
    /// Persisted alert records
    store: Arc<dyn AlertStateStore>,
    /// Delivery channel
    notifier: Arc<dyn Notifier>,
    /// Time source for debounce decisions
    clock: Arc<dyn Clock>,
    /// Alert recipient
    recipient: String,
    /// Upper bound on each probe
    probe_timeout: Duration,
    /// Serializes state updates per check name
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Result of one check run
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Check passed; `cleared` is true if an alert state was removed
    Healthy { cleared: bool },
    /// A notification was attempted
    Alerted { repeat: bool, delivered: bool },
    /// Unhealthy but inside the debounce window
    Suppressed { next_alert_at: DateTime<Utc> },
}

/// Outcome for one named check
#[derive(Debug)]
pub struct CheckReport {
    pub name: String,
    pub result: Result<CheckOutcome, CheckError>,
}

/// Outcomes of a full pass over all checks
#[derive(Debug, Default)]
pub struct RunReport {
    pub checks: Vec<CheckReport>,
}

impl RunReport {
    /// Checks that failed operationally
    pub fn failures(&self) -> impl Iterator<Item = &CheckReport> {
        self.checks.iter().filter(|c| c.result.is_err())
    }

    /// Number of notifications attempted
    pub fn alerts_attempted(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| matches!(c.result, Ok(CheckOutcome::Alerted { .. })))
            .count()
    }

    /// True when checks were given but none could touch its state
    pub fn state_unusable(&self) -> bool {
        !self.checks.is_empty()
            && self
                .checks
                .iter()
                .all(|c| matches!(c.result, Err(CheckError::Persistence(_))))
    }
}

impl Supervisor {
    /// Create a new supervisor using the wall clock
    pub fn new(
        store: Arc<dyn AlertStateStore>,
        notifier: Arc<dyn Notifier>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            recipient: recipient.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the probe timeout
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Run every check; one failing check never stops the others
    pub async fn run_all(&self, checks: &[Check]) -> RunReport {
        let runs = checks.iter().map(|check| async move {
            CheckReport {
                name: check.name.clone(),
                result: self.run_check(check).await,
            }
        });

        RunReport {
            checks: futures::future::join_all(runs).await,
        }
    }

    /// Run a single check through probe, evaluation, debounce and notify
    pub async fn run_check(&self, check: &Check) -> Result<CheckOutcome, CheckError> {
        if check.name.trim().is_empty() {
            return Err(CheckError::InvalidCheck(
                "check name must not be empty".to_string(),
            ));
        }

        let lock = self.lock_for(&check.name);
        let _guard = lock.lock().await;

        let evaluation = match self.evaluate(check).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::error!(check = %check.name, error = %e, "Check could not be evaluated");
                if check.escalate_probe_errors {
                    self.escalate(check, &e).await;
                }
                return Err(e);
            }
        };

        if check.escalate_probe_errors {
            self.settle_escalation(check);
        }

        let now = self.clock.now();
        let existing = self.store.load(&check.name).map_err(|e| {
            tracing::error!(check = %check.name, error = %e, "Failed to read alert state");
            CheckError::Persistence(e)
        })?;

        match decide(evaluation.status(), existing.as_ref(), check.debounce, now) {
            Decision::Clear => {
                let cleared = self.store.clear(&check.name).map_err(|e| {
                    tracing::error!(check = %check.name, error = %e, "Failed to clear alert state");
                    CheckError::Persistence(e)
                })?;
                if cleared {
                    tracing::info!(check = %check.name, "{} has recovered; alert state cleared", check.target);
                } else {
                    tracing::info!(check = %check.name, "{} is healthy", check.target);
                }
                Ok(CheckOutcome::Healthy { cleared })
            }
            Decision::Alert => {
                tracing::warn!(check = %check.name, "{} is unhealthy. Sending alert", check.target);
                let state = AlertState::new(check.name.clone(), now);
                let notification = compose_alert(check, &evaluation, false, &self.recipient);
                let delivered = self.fire(state, &notification).await?;
                Ok(CheckOutcome::Alerted {
                    repeat: false,
                    delivered,
                })
            }
            Decision::Realert => {
                tracing::warn!(
                    check = %check.name,
                    debounce_secs = check.debounce.as_secs(),
                    "{} is still unhealthy past the debounce window. Sending another alert",
                    check.target
                );
                let mut state = existing.unwrap_or_else(|| AlertState::new(check.name.clone(), now));
                state.realert(now);
                let notification = compose_alert(check, &evaluation, true, &self.recipient);
                let delivered = self.fire(state, &notification).await?;
                Ok(CheckOutcome::Alerted {
                    repeat: true,
                    delivered,
                })
            }
            Decision::Suppress { next_alert_at } => {
                tracing::info!(
                    check = %check.name,
                    next_alert_at = %next_alert_at,
                    "{} is still unhealthy. No new alert sent",
                    check.target
                );
                Ok(CheckOutcome::Suppressed { next_alert_at })
            }
        }
    }

    /// Take a bounded reading and judge it
    async fn evaluate(&self, check: &Check) -> Result<Evaluation, CheckError> {
        tracing::debug!(check = %check.name, probe = %check.probe.describe(), "Probing");

        let reading: Reading = tokio::time::timeout(self.probe_timeout, check.probe.probe())
            .await
            .map_err(|_| ProbeError::Timeout(self.probe_timeout))??;

        check
            .condition
            .evaluate(&reading)
            .map_err(CheckError::Inconclusive)
    }

    /// Persist the alert decision, then deliver
    ///
    /// The timer advances even when delivery fails; the failure is kept in
    /// the record and retried after the next debounce window.
    async fn fire(&self, mut state: AlertState, notification: &Notification) -> Result<bool, CheckError> {
        state.last_delivery_error = None;
        self.store.save(&state).map_err(|e| {
            tracing::error!(check = %state.check, error = %e, "Failed to write alert state; alert not sent");
            CheckError::Persistence(e)
        })?;

        match self.notifier.send(notification).await {
            Ok(()) => {
                tracing::info!(check = %state.check, to = %notification.to, "Alert delivered");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(check = %state.check, error = %e, "Failed to send alert");
                state.last_delivery_error = Some(e.to_string());
                if let Err(e) = self.store.save(&state) {
                    tracing::error!(check = %state.check, error = %e, "Failed to record delivery error");
                }
                Ok(false)
            }
        }
    }

    /// Notify about a probe that could not produce a usable reading
    async fn escalate(&self, check: &Check, error: &CheckError) {
        let key = escalation_key(&check.name);
        let now = self.clock.now();

        let existing = match self.store.load(&key) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(check = %check.name, error = %e, "Failed to read escalation state");
                return;
            }
        };

        let state = match decide(Status::Unhealthy, existing.as_ref(), check.debounce, now) {
            Decision::Alert => AlertState::new(key, now),
            Decision::Realert => {
                let mut state = existing.unwrap_or_else(|| AlertState::new(key, now));
                state.realert(now);
                state
            }
            Decision::Suppress { .. } | Decision::Clear => return,
        };

        let notification = Notification {
            to: self.recipient.clone(),
            subject: format!("{} check failed", check.name),
            body: format!(
                "The {} check for {} could not run: {}",
                check.name, check.target, error
            ),
            priority: Priority::Normal,
        };

        if let Err(e) = self.fire(state, &notification).await {
            tracing::error!(check = %check.name, error = %e, "Failed to escalate probe error");
        }
    }

    /// Drop escalation state once the probe works again
    fn settle_escalation(&self, check: &Check) {
        match self.store.clear(&escalation_key(&check.name)) {
            Ok(true) => tracing::info!(check = %check.name, "Probe recovered"),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(check = %check.name, error = %e, "Failed to clear escalation state")
            }
        }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

/// State key for probe-error escalations of a check
pub fn escalation_key(check: &str) -> String {
    format!("{}#probe-error", check)
}

/// Build the alert email for an unhealthy check
pub fn compose_alert(check: &Check, evaluation: &Evaluation, repeat: bool, to: &str) -> Notification {
    let (subject, body) = match (&check.target, evaluation) {
        (CheckTarget::Partition { host, path }, Evaluation::Disk { usage, threshold, .. }) => (
            format!("{} ({}) Disk Usage Alert", host, path),
            format!(
                "Disk usage on {} in partition {} is above {}%. Current usage is {}%.",
                host, path, threshold, usage
            ),
        ),
        (CheckTarget::Host { address, label }, _) => (
            format!("{} Server Down", label),
            if repeat {
                format!("{} ({}) is still offline.", label, address)
            } else {
                format!("{} ({}) is not online.", label, address)
            },
        ),
        (target, _) => (
            format!("{} Alert", check.name),
            format!("{} is unhealthy.", target),
        ),
    };

    Notification {
        to: to.to_string(),
        subject,
        body,
        priority: Priority::Urgent,
    }
}

/// Check run errors
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Invalid check: {0}")]
    InvalidCheck(String),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Evaluation inconclusive: {0}")]
    Inconclusive(String),

    #[error("State error: {0}")]
    Persistence(#[from] StateError),
}
