//! Shell-command actions built from the config file.

use cadence::{ActionResult, UpdateAction, UpdateSpec};
use tokio::process::Command;

use crate::config::ActionConfig;

/// Captured result of one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit code; `None` if killed by a signal or never started.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Action running `sh -c <command>`. A non-zero exit or a spawn error counts as failure.
pub fn shell_action(config: &ActionConfig) -> UpdateAction<(), ShellOutput> {
    let id = config.id.clone();
    let command = config.command.clone();
    UpdateAction::new(config.id.clone(), move || run(id.clone(), command.clone()))
}

/// The single unconditional spec for a configured action.
pub fn shell_spec(config: &ActionConfig) -> UpdateSpec {
    UpdateSpec::with_failure_interval(config.interval_ms, config.failure_interval_ms(), [])
}

async fn run(id: String, command: String) -> ActionResult<ShellOutput> {
    match Command::new("sh").arg("-c").arg(&command).output().await {
        Ok(output) => {
            let result = ShellOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            if output.status.success() {
                log::debug!("Action {} succeeded", id);
                ActionResult::success(result)
            } else {
                log::warn!("Action {} exited with {:?}", id, result.code);
                ActionResult::failure(result)
            }
        }
        Err(e) => {
            log::error!("Failed to spawn action {}: {}", id, e);
            ActionResult::failure(ShellOutput {
                code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            })
        }
    }
}
