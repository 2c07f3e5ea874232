//! Control of the self-managed liveness process.

use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Terminates the external liveness process on FAULT/STOP
pub trait ProcessControl: Send + Sync {
    /// Best-effort; failures are logged, never reported back
    fn terminate_liveness_process(&self);
}

/// Runs `pkill <process>` on the tokio runtime without waiting for it
#[derive(Debug, Clone)]
pub struct CommandProcessControl {
    process: String,
}

impl CommandProcessControl {
    pub fn new(process: impl Into<String>) -> Self {
        Self {
            process: process.into(),
        }
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    /// Start `pkill` and a task that reaps it.
    ///
    /// Returns `None` when no runtime is available or the command could not
    /// be started.
    fn spawn_kill(&self) -> Option<JoinHandle<Option<ExitStatus>>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No runtime to run pkill {}", self.process);
                return None;
            }
        };
        let _guard = handle.enter();

        let spawned = Command::new("pkill")
            .arg(&self.process)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to run pkill {}: {}", self.process, e);
                return None;
            }
        };

        let process = self.process.clone();
        Some(handle.spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    debug!("pkill {} exited with {}", process, status);
                    Some(status)
                }
                Err(e) => {
                    warn!("Failed to wait for pkill {}: {}", process, e);
                    None
                }
            }
        }))
    }
}

impl ProcessControl for CommandProcessControl {
    fn terminate_liveness_process(&self) {
        let _ = self.spawn_kill();
    }
}
