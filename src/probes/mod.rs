//! Probes produce raw readings for checks
//!
//! - Disk usage via `sysinfo`
//! - Host reachability via the system `ping` binary

pub mod disk;
pub mod reachability;

pub use disk::DiskUsageProbe;
pub use reachability::PingProbe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Successful output of a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    /// Space usage of the filesystem mounted at `mount`
    DiskUsage {
        mount: String,
        used_bytes: u64,
        total_bytes: u64,
    },
    /// Echo requests sent and replies received
    Reachability { transmitted: u32, received: u32 },
}

impl Reading {
    /// Used space as a whole percentage, rounded up like `df`
    ///
    /// Returns `None` when the filesystem reports no capacity or more
    /// used than total.
    pub fn usage_percent(&self) -> Option<u8> {
        match self {
            Reading::DiskUsage {
                used_bytes,
                total_bytes,
                ..
            } => {
                if *total_bytes == 0 || used_bytes > total_bytes {
                    return None;
                }
                let pct = (*used_bytes as u128 * 100).div_ceil(*total_bytes as u128);
                Some(pct as u8)
            }
            Reading::Reachability { .. } => None,
        }
    }

    /// Whether any reply came back; `None` if nothing was sent
    pub fn is_reachable(&self) -> Option<bool> {
        match self {
            Reading::Reachability {
                transmitted,
                received,
            } => {
                if *transmitted == 0 {
                    None
                } else {
                    Some(*received > 0)
                }
            }
            Reading::DiskUsage { .. } => None,
        }
    }
}

/// A measurement source for one check
#[async_trait]
pub trait Probe: Send + Sync {
    /// Short description for logs, e.g. `ping 10.0.0.27`
    fn describe(&self) -> String;

    /// Take one reading
    async fn probe(&self) -> Result<Reading, ProbeError>;
}

/// The probe mechanism itself failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to execute {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("probe timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{command} exited with status {status}: {stderr}")]
    Exit {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("unexpected probe output: {0}")]
    Output(String),

    #[error("no mounted filesystem contains {0}")]
    NoMount(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percent_rounds_up() {
        let reading = Reading::DiskUsage {
            mount: "/".to_string(),
            used_bytes: 801,
            total_bytes: 1000,
        };
        assert_eq!(reading.usage_percent(), Some(81));

        let reading = Reading::DiskUsage {
            mount: "/".to_string(),
            used_bytes: 850,
            total_bytes: 1000,
        };
        assert_eq!(reading.usage_percent(), Some(85));
    }

    #[test]
    fn test_usage_percent_rejects_bad_shapes() {
        let empty = Reading::DiskUsage {
            mount: "/".to_string(),
            used_bytes: 0,
            total_bytes: 0,
        };
        assert_eq!(empty.usage_percent(), None);

        let ping = Reading::Reachability {
            transmitted: 1,
            received: 1,
        };
        assert_eq!(ping.usage_percent(), None);
    }

    #[test]
    fn test_is_reachable() {
        let up = Reading::Reachability {
            transmitted: 1,
            received: 1,
        };
        let down = Reading::Reachability {
            transmitted: 1,
            received: 0,
        };
        let nothing = Reading::Reachability {
            transmitted: 0,
            received: 0,
        };
        assert_eq!(up.is_reachable(), Some(true));
        assert_eq!(down.is_reachable(), Some(false));
        assert_eq!(nothing.is_reachable(), None);
    }
}
