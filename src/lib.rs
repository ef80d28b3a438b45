//! Heartbeat: health checks with debounced email alerts
//!
//! Each invocation runs a set of named checks once, evaluates each reading
//! against its condition, and emails an alert when a check newly fails or
//! is still failing after its debounce interval. Scheduling is external
//! (cron or a systemd timer).
//!
//! # Features
//!
//! - **Disk usage**: alert when a partition reaches a usage threshold
//! - **Reachability**: alert when a host stops answering ping
//! - **Debounce**: at most one alert per check per interval, persisted
//!   across invocations
//! - **SMTP delivery**: STARTTLS or implicit TLS with authentication
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use heartbeat::alerts::{Check, LogNotifier, Supervisor};
//! use heartbeat::state::FileStateStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileStateStore::new("./flags")?);
//! let supervisor = Supervisor::new(store, Arc::new(LogNotifier), "ops@example.com");
//!
//! let checks = vec![
//!     Check::heartbeat("10.0.0.27", "Sandbox Server"),
//!     Check::disk_usage("web-1", "/", 80),
//! ];
//! let report = supervisor.run_all(&checks).await;
//! println!("{} alerts", report.alerts_attempted());
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod clock;
pub mod config;
pub mod probes;
pub mod state;

// Re-export commonly used types
pub use alerts::{Check, CheckError, CheckOutcome, RunReport, Supervisor};
pub use config::{Config, ConfigError};
pub use state::{AlertState, AlertStateStore, StateError};
