//! ICMP echo via the system `ping` binary
//!
//! Raw ICMP sockets need privileges; the setuid `ping` does not. When the
//! binary is missing or cannot be spawned the outcome is
//! [`PingOutcome::Unavailable`] and the scan carries on without ping.

use async_trait::async_trait;
use minerscope_common::{PingOutcome, Pinger};
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct SystemPinger {
    program: String,
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPinger {
    pub fn new() -> Self {
        Self::with_program("ping")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// `ping -W` takes whole seconds.
fn wait_secs(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

#[async_trait]
impl Pinger for SystemPinger {
    #[instrument(skip(self))]
    async fn ping(&self, address: Ipv4Addr, wait: Duration) -> PingOutcome {
        let start = Instant::now();
        let child = Command::new(&self.program)
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(wait_secs(wait).max(1).to_string())
            .arg(address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match timeout(wait, child).await {
            Ok(Ok(status)) if status.success() => PingOutcome::Reply(start.elapsed()),
            Ok(Ok(_)) => PingOutcome::NoReply,
            Ok(Err(e)) => {
                debug!("ping unavailable: {}", e);
                PingOutcome::Unavailable
            }
            Err(_) => PingOutcome::NoReply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_secs_rounds_up() {
        assert_eq!(wait_secs(Duration::from_millis(1000)), 1);
        assert_eq!(wait_secs(Duration::from_millis(1500)), 2);
        assert_eq!(wait_secs(Duration::from_millis(200)), 1);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let pinger = SystemPinger::with_program("/nonexistent/minerscope-ping");
        let outcome = pinger
            .ping(Ipv4Addr::LOCALHOST, Duration::from_millis(500))
            .await;
        assert_eq!(outcome, PingOutcome::Unavailable);
    }
}
