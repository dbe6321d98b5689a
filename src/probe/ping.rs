//! Ping probe via the system `ping` command.
//!
//! One echo request per probe. Reachability comes from the exit status; the
//! process is additionally bounded by a tokio timeout in case `-W` is not
//! honored (some ping builds ignore it for resolution failures).

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::ProbeError;

/// Run a single ping against the given address.
///
/// Returns `Ok(true)` when the address replied, `Ok(false)` when ping ran but
/// got no reply, and an error when the command could not be executed.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<bool, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let mut command = Command::new("ping");
    command
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    // Grace of one extra second for process startup and teardown.
    let bounded = tokio::time::timeout(timeout + Duration::from_secs(1), command.output());

    match bounded.await {
        Ok(Ok(output)) => Ok(output.status.success()),
        Ok(Err(e)) => Err(ProbeError::Command(format!(
            "failed to execute ping: {}",
            e
        ))),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_loopback_is_reachable() {
        // Loopback should answer on any machine with a working ping binary.
        let result = run_ping_probe("127.0.0.1", Duration::from_secs(2)).await;
        match result {
            Ok(reachable) => assert!(reachable),
            // No ping binary in the environment; the command error path is
            // still the right behavior.
            Err(ProbeError::Command(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[tokio::test]
    async fn test_ping_unroutable_is_unreachable() {
        // TEST-NET-1 (RFC 5737) is reserved and never answers.
        let result = run_ping_probe("192.0.2.1", Duration::from_secs(1)).await;
        match result {
            Ok(reachable) => assert!(!reachable),
            Err(ProbeError::Timeout(_)) | Err(ProbeError::Command(_)) => {}
        }
    }
}
