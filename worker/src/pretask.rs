//! Pre-task sanity check: before executing a fetched task, verify every
//! configured read target is readable and every configured write target is
//! writable. A failure here prevents the task from starting at all rather
//! than failing partway through a command.

use shared::config::PreTaskCheckConfig;
use std::path::Path;

#[derive(Debug)]
pub struct PreTaskCheckFailure {
    pub target: std::path::PathBuf,
    pub reason: String,
}

impl std::fmt::Display for PreTaskCheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.target.display(), self.reason)
    }
}

/// Run the configured checks, short-circuiting on the first failure. Checks
/// run in the order targets were declared so the failure message always
/// names a deterministic target.
pub fn run(config: &PreTaskCheckConfig) -> Result<(), PreTaskCheckFailure> {
    for target in config.read_targets() {
        check_readable(target)?;
    }
    for target in config.write_targets() {
        check_writable(target)?;
    }
    Ok(())
}

fn check_readable(target: &Path) -> Result<(), PreTaskCheckFailure> {
    std::fs::metadata(target).map_err(|e| PreTaskCheckFailure {
        target: target.to_path_buf(),
        reason: format!("not readable: {}", e),
    })?;
    Ok(())
}

fn check_writable(target: &Path) -> Result<(), PreTaskCheckFailure> {
    let probe = target.join(".worker-write-check");
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(e) => Err(PreTaskCheckFailure { target: target.to_path_buf(), reason: format!("not writable: {}", e) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn passes_when_all_targets_are_accessible() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = HashMap::new();
        entries.insert("read_output".to_string(), dir.path().to_path_buf());
        entries.insert("write_scratch".to_string(), dir.path().to_path_buf());
        let config = PreTaskCheckConfig { entries };
        assert!(run(&config).is_ok());
    }

    #[test]
    fn fails_when_a_read_target_is_missing() {
        let mut entries = HashMap::new();
        entries.insert("read_output".to_string(), std::path::PathBuf::from("/nonexistent/path/xyz"));
        let config = PreTaskCheckConfig { entries };
        assert!(run(&config).is_err());
    }
}
