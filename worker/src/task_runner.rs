//! Task Runner: executes a fetched [`Task`]'s commands in order, aggregating
//! per-command timing into a task-level total. Cooperative abort is driven
//! externally through the `watch::Receiver` the caller supplies — the
//! runner itself holds no per-task state, so the Core can own the matching
//! `watch::Sender` directly without borrowing through the runner.

use crate::commands::{registry, CommandContext, CommandFn};
use shared::api::{Command, Task};
use shared::timing::Timing;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{error, info};

/// Outcome of running a task to completion (or abort).
pub struct TaskOutcome {
    pub success: bool,
    pub aborted: bool,
    pub current_command_idx: usize,
    pub timing: Timing,
    pub error: Option<String>,
}

pub struct TaskRunner {
    commands: HashMap<&'static str, CommandFn>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self { commands: registry() }
    }

    /// Run every command in `task` in order. Stops (without treating it as
    /// failure) the moment `cancelled` flips to `true`; a command that is
    /// already mid-flight when cancellation is requested is allowed to
    /// finish on its own — racing to cut it off mid-syscall buys nothing
    /// since its result is about to be discarded.
    pub async fn execute(&self, task: &Task, cancelled: watch::Receiver<bool>) -> TaskOutcome {
        let mut aggregate = Timing::new();
        let mut current_command_idx = 0;

        for (idx, command) in task.commands.iter().enumerate() {
            current_command_idx = idx;

            if *cancelled.borrow() {
                info!("task {} aborted before command {} ({})", task.id, idx, command.name);
                return TaskOutcome {
                    success: false,
                    aborted: true,
                    current_command_idx,
                    timing: aggregate,
                    error: Some("task aborted".to_string()),
                };
            }

            match self.run_command(command, cancelled.clone()).await {
                Ok(per_command) => aggregate.merge(&per_command),
                Err(e) => {
                    error!("task {} command {} ({}) failed: {}", task.id, idx, command.name, e);
                    return TaskOutcome {
                        success: false,
                        aborted: false,
                        current_command_idx,
                        timing: aggregate,
                        error: Some(e.to_string()),
                    };
                }
            }

            if *cancelled.borrow() {
                info!("task {} aborted after command {} ({})", task.id, idx, command.name);
                return TaskOutcome {
                    success: false,
                    aborted: true,
                    current_command_idx,
                    timing: aggregate,
                    error: Some("task aborted".to_string()),
                };
            }
        }

        info!("task {} completed with aggregate timing {:?}", task.id, aggregate);
        TaskOutcome { success: true, aborted: false, current_command_idx, timing: aggregate, error: None }
    }

    async fn run_command(&self, command: &Command, cancelled: watch::Receiver<bool>) -> anyhow::Result<Timing> {
        let implementation = self
            .commands
            .get(command.name.as_str())
            .ok_or_else(|| anyhow::anyhow!("unknown command: {}", command.name))?;

        let ctx = CommandContext { settings: command.settings.clone(), cancelled };
        implementation(ctx).await
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::api::Command;
    use tokio::sync::watch;

    fn task_with(commands: Vec<Command>) -> Task {
        Task { id: "T1".to_string(), commands, metadata: serde_json::Value::Null }
    }

    #[tokio::test]
    async fn execute_runs_commands_in_order_and_aggregates_timing() {
        let runner = TaskRunner::new();
        let (_tx, rx) = watch::channel(false);
        let task = task_with(vec![
            Command { name: "echo".to_string(), settings: serde_json::json!({"message": "a"}) },
            Command { name: "echo".to_string(), settings: serde_json::json!({"message": "b"}) },
        ]);
        let outcome = runner.execute(&task, rx).await;
        assert!(outcome.success);
        assert!(!outcome.aborted);
        assert!(outcome.timing.get("run").unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn execute_fails_on_unknown_command() {
        let runner = TaskRunner::new();
        let (_tx, rx) = watch::channel(false);
        let task = task_with(vec![Command { name: "no-such-command".to_string(), settings: serde_json::Value::Null }]);
        let outcome = runner.execute(&task, rx).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn execute_stops_early_once_cancelled() {
        let runner = TaskRunner::new();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let task = task_with(vec![Command { name: "echo".to_string(), settings: serde_json::json!({"message": "a"}) }]);
        let outcome = runner.execute(&task, rx).await;
        assert!(outcome.aborted);
    }
}
