//! Process liveness and signal delivery through the system `kill` utility.

use crate::errors::SupervisorError;
use std::process::Stdio;
use tokio::process::Command;

/// Signals the supervisor sends to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

/// `kill -0 <pid>`: true when the process exists and may be signalled.
pub async fn is_alive(pid: u32) -> bool {
    if pid <= 1 {
        return false;
    }
    match Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to run kill -0");
            false
        }
    }
}

/// Send `signal` to the process group led by `pid`, falling back to the process alone.
pub async fn send_signal(pid: u32, signal: Signal) -> Result<(), SupervisorError> {
    if pid <= 1 {
        return Err(SupervisorError::SignalFailed(
            pid,
            "refusing to signal a reserved pid".to_string(),
        ));
    }

    let group = format!("-{}", pid);
    if run_kill(signal, &group).await? {
        return Ok(());
    }
    if run_kill(signal, &pid.to_string()).await? {
        return Ok(());
    }
    Err(SupervisorError::SignalFailed(
        pid,
        format!("kill -s {} failed", signal.as_str()),
    ))
}

async fn run_kill(signal: Signal, target: &str) -> Result<bool, SupervisorError> {
    let output = Command::new("kill")
        .args(["-s", signal.as_str(), "--", target])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SupervisorError::SignalFailed(0, e.to_string()))?;

    if !output.status.success() {
        tracing::debug!(
            target,
            signal = signal.as_str(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "kill reported failure"
        );
    }
    Ok(output.status.success())
}
