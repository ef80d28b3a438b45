//! Host reachability probe using the system `ping` binary

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::{Probe, ProbeError, Reading};

/// Exit status `ping` uses when no reply arrived
const NO_REPLY_STATUS: i32 = 1;

/// How long ping may wait for replies unless told otherwise
pub const DEFAULT_PING_DEADLINE: Duration = Duration::from_secs(5);

/// Room left between ping's deadline and a caller's time budget
const DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Extra time a ping that ignores its deadline gets before it is killed
const OVERRUN_GRACE: Duration = Duration::from_millis(500);

#[cfg(target_os = "linux")]
const DEADLINE_FLAG: &str = "-w";
#[cfg(not(target_os = "linux"))]
const DEADLINE_FLAG: &str = "-t";

/// Sends ICMP echo requests to one host
#[derive(Debug, Clone)]
pub struct PingProbe {
    host: String,
    attempts: u32,
    deadline: Duration,
    program: String,
}

impl PingProbe {
    /// One echo request, as the heartbeat scripts do
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            attempts: 1,
            deadline: DEFAULT_PING_DEADLINE,
            program: "ping".to_string(),
        }
    }

    /// Deadline that lets ping finish inside `budget`
    ///
    /// Never below one second, the smallest deadline ping accepts.
    pub fn deadline_within(budget: Duration) -> Duration {
        budget
            .saturating_sub(DEADLINE_MARGIN)
            .max(Duration::from_secs(1))
    }

    /// Set how long ping waits for replies before giving up
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline.max(Duration::from_secs(1));
        self
    }

    /// Set the number of echo requests
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Use a different ping executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whole seconds passed to ping, rounded up
    fn deadline_secs(&self) -> u64 {
        let secs = self.deadline.as_secs();
        if self.deadline.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    fn no_reply(&self) -> Reading {
        Reading::Reachability {
            transmitted: self.attempts,
            received: 0,
        }
    }
}

#[async_trait]
impl Probe for PingProbe {
    fn describe(&self) -> String {
        format!(
            "{} -c {} {} {} {}",
            self.program,
            self.attempts,
            DEADLINE_FLAG,
            self.deadline_secs(),
            self.host
        )
    }

    async fn probe(&self) -> Result<Reading, ProbeError> {
        let run = Command::new(&self.program)
            .arg("-c")
            .arg(self.attempts.to_string())
            .arg(DEADLINE_FLAG)
            .arg(self.deadline_secs().to_string())
            .arg(&self.host)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        // A ping still running past its own deadline has had no reply
        let limit = Duration::from_secs(self.deadline_secs()) + OVERRUN_GRACE;
        let output = match tokio::time::timeout(limit, run).await {
            Ok(output) => output.map_err(|e| ProbeError::Spawn {
                command: self.program.clone(),
                message: e.to_string(),
            })?,
            Err(_) => {
                tracing::debug!(host = %self.host, "ping overran its deadline; treating as no reply");
                return Ok(self.no_reply());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = parse_summary(&stdout);

        match output.status.code() {
            Some(0) => {
                let (transmitted, received) = summary.ok_or_else(|| {
                    ProbeError::Output(format!("no packet summary in output of {}", self.describe()))
                })?;
                Ok(Reading::Reachability {
                    transmitted,
                    received,
                })
            }
            Some(NO_REPLY_STATUS) => {
                Ok(summary
                    .map(|(transmitted, received)| Reading::Reachability {
                        transmitted,
                        received,
                    })
                    .unwrap_or_else(|| self.no_reply()))
            }
            status => Err(ProbeError::Exit {
                command: self.describe(),
                status: status.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

fn summary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received")
            .expect("summary pattern is valid")
    })
}

/// Extract `(transmitted, received)` from ping's statistics line
pub fn parse_summary(output: &str) -> Option<(u32, u32)> {
    let caps = summary_regex().captures(output)?;
    let transmitted = caps.get(1)?.as_str().parse().ok()?;
    let received = caps.get(2)?.as_str().parse().ok()?;
    Some((transmitted, received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    #[test]
    fn test_parse_linux_summary() {
        let output = "PING 10.0.0.27 (10.0.0.27) 56(84) bytes of data.\n\
                      64 bytes from 10.0.0.27: icmp_seq=1 ttl=64 time=0.045 ms\n\n\
                      --- 10.0.0.27 ping statistics ---\n\
                      1 packets transmitted, 1 received, 0% packet loss, time 0ms\n";
        assert_eq!(parse_summary(output), Some((1, 1)));
    }

    #[test]
    fn test_parse_bsd_summary() {
        let output = "--- 10.0.0.27 ping statistics ---\n\
                      3 packets transmitted, 0 packets received, 100.0% packet loss\n";
        assert_eq!(parse_summary(output), Some((3, 0)));
    }

    #[test]
    fn test_parse_missing_summary() {
        assert_eq!(parse_summary("ping: unknown host"), None);
    }

    #[test]
    fn test_attempts_at_least_one() {
        let probe = PingProbe::new("10.0.0.27").with_attempts(0);
        assert_eq!(
            probe.describe(),
            format!("ping -c 1 {} 5 10.0.0.27", DEADLINE_FLAG)
        );
    }

    #[test]
    fn test_deadline_fits_budget() {
        assert_eq!(
            PingProbe::deadline_within(Duration::from_secs(10)),
            Duration::from_secs(9)
        );
        assert_eq!(
            PingProbe::deadline_within(Duration::from_millis(300)),
            Duration::from_secs(1)
        );

        let probe = PingProbe::new("10.0.0.27").with_deadline(Duration::from_millis(1500));
        assert_eq!(probe.deadline_secs(), 2);
        assert_eq!(
            PingProbe::new("10.0.0.27").with_deadline(Duration::ZERO).deadline(),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_probe_error() {
        let probe = PingProbe::new("10.0.0.27").with_program("/nonexistent/ping-binary");
        let result = probe.probe().await;
        assert!(matches!(result, Err(ProbeError::Spawn { .. })));
    }

    /// Write an executable stand-in for ping into `dir`
    #[cfg(unix)]
    fn fake_ping(dir: &TempDir, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("ping");
        std::fs::write(&path, format!("#!/bin/sh\n{}", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passes_deadline_to_ping() {
        let dir = TempDir::new().unwrap();
        let args = dir.path().join("args");
        let program = fake_ping(
            &dir,
            &format!(
                "echo \"$@\" > {}\necho '1 packets transmitted, 1 received'\n",
                args.display()
            ),
        );

        let probe = PingProbe::new("10.0.0.27")
            .with_deadline(Duration::from_secs(3))
            .with_program(program);
        let reading = assert_ok!(probe.probe().await);

        assert_eq!(reading.is_reachable(), Some(true));
        let seen = std::fs::read_to_string(&args).unwrap();
        assert_eq!(seen.trim(), format!("-c 1 {} 3 10.0.0.27", DEADLINE_FLAG));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_host_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let program = fake_ping(
            &dir,
            "sleep 1\necho '1 packets transmitted, 0 received, 100% packet loss'\nexit 1\n",
        );

        let probe = PingProbe::new("10.0.0.27").with_program(program);
        let reading = assert_ok!(probe.probe().await);
        assert_eq!(reading.is_reachable(), Some(false));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ping_ignoring_deadline_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let program = fake_ping(&dir, "sleep 30\n");

        let probe = PingProbe::new("10.0.0.27")
            .with_deadline(Duration::from_secs(1))
            .with_program(program);

        let started = std::time::Instant::now();
        let reading = assert_ok!(probe.probe().await);
        assert_eq!(reading.is_reachable(), Some(false));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
