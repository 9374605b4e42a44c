//! Command registry.
//!
//! Each command a task can name is registered here under its `name` string,
//! resolving to a function that runs it and returns the per-command
//! `Timing`. This replaces dispatch-by-enum with a lookup: adding a new
//! command means registering one more entry, not touching a `match`.

mod copy_file;
mod echo;
mod sleep;

use futures_util::future::BoxFuture;
use shared::timing::Timing;
use std::collections::HashMap;
use tokio::sync::watch;

/// Everything a command implementation needs: its opaque settings and a
/// receiver that flips to `true` when the task has been told to stop.
/// Commands are expected to check this cooperatively at natural yield
/// points (e.g. between subprocess output lines, during a sleep); there is
/// no pre-emptive cancellation.
pub struct CommandContext {
    pub settings: serde_json::Value,
    pub cancelled: watch::Receiver<bool>,
}

impl CommandContext {
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

pub type CommandFn = fn(CommandContext) -> BoxFuture<'static, anyhow::Result<Timing>>;

/// Build the registry mapping command name to implementation.
pub fn registry() -> HashMap<&'static str, CommandFn> {
    let mut map: HashMap<&'static str, CommandFn> = HashMap::new();
    map.insert("echo", echo::run as CommandFn);
    map.insert("sleep", sleep::run as CommandFn);
    map.insert("copy_file", copy_file::run as CommandFn);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_every_built_in_command() {
        let reg = registry();
        assert!(reg.contains_key("echo"));
        assert!(reg.contains_key("sleep"));
        assert!(reg.contains_key("copy_file"));
    }
}
