//! Alerting for health checks
//!
//! Runs checks, evaluates readings against their conditions, suppresses
//! repeat alerts inside a debounce window, and delivers email notifications.

pub mod checker;
pub mod config;
pub mod debounce;
pub mod notifier;

pub use checker::{CheckError, CheckOutcome, CheckReport, RunReport, Supervisor};
pub use config::{AlertCondition, Check, CheckTarget, Evaluation, Status};
pub use debounce::{decide, Decision};
pub use notifier::{LogNotifier, Notification, Notifier, NotifierError, Priority, SmtpNotifier};
