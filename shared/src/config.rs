//! Worker configuration model.
//!
//! `WorkerConfig` is loaded from a TOML file and carries every tunable the
//! Worker Core and its collaborators read. `worker_id`/`worker_secret` may
//! also be supplied here, but are normally persisted separately in the
//! home-config file and merged on top at startup (see `worker::home_config`).

use crate::defaults;
use crate::utils::validate_url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn default_task_types() -> Vec<String> {
    Vec::new()
}

fn default_task_update_queue_db() -> PathBuf {
    PathBuf::from("worker_queue.db")
}

fn default_nickname() -> String {
    "worker".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Readability/writability targets for the pre-task sanity check.
///
/// Keys starting with `read` name readability targets; keys starting with
/// `write` name writability targets. Both sets are immutable after startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreTaskCheckConfig {
    #[serde(flatten)]
    pub entries: HashMap<String, PathBuf>,
}

impl PreTaskCheckConfig {
    pub fn read_targets(&self) -> Vec<&PathBuf> {
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with("read"))
            .map(|(_, v)| v)
            .collect()
    }

    pub fn write_targets(&self) -> Vec<&PathBuf> {
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with("write"))
            .map(|(_, v)| v)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Manager base URL. Absent triggers SSDP discovery at startup.
    #[serde(default)]
    pub manager_url: Option<String>,

    /// Supported task (command) types, reported to the Manager at
    /// registration/sign-on time.
    #[serde(default = "default_task_types")]
    pub task_types: Vec<String>,

    /// Path to the durable update-queue database.
    #[serde(default = "default_task_update_queue_db")]
    pub task_update_queue_db: PathBuf,

    /// Optional path to an exclusive-create PID file guarding against two
    /// worker processes racing over the same subprocess slot.
    #[serde(default)]
    pub subprocess_pid_file: Option<PathBuf>,

    /// Human-readable nickname reported at registration/sign-on.
    #[serde(default = "default_nickname")]
    pub nickname: String,

    /// Worker id, normally empty until the home-config merge fills it in.
    #[serde(default)]
    pub worker_id: String,

    /// Worker secret, normally empty until the home-config merge fills it in.
    #[serde(default)]
    pub worker_secret: String,

    /// Pre-shared registration secret used to sign the one-time bearer JWT.
    #[serde(default)]
    pub worker_registration_secret: Option<String>,

    #[serde(default = "defaults::default_may_i_run_interval_seconds")]
    pub may_i_run_interval_seconds: u64,

    #[serde(default = "defaults::default_push_log_max_interval_seconds")]
    pub push_log_max_interval_seconds: u64,

    #[serde(default = "defaults::default_push_log_max_entries")]
    pub push_log_max_entries: usize,

    #[serde(default = "defaults::default_push_act_max_interval_seconds")]
    pub push_act_max_interval_seconds: u64,

    #[serde(default = "defaults::default_register_retry_seconds")]
    pub register_retry_seconds: u64,

    #[serde(default = "defaults::default_fetch_fail_seconds")]
    pub fetch_fail_seconds: u64,

    #[serde(default = "defaults::default_fetch_empty_seconds")]
    pub fetch_empty_seconds: u64,

    #[serde(default = "defaults::default_fetch_done_seconds")]
    pub fetch_done_seconds: u64,

    #[serde(default = "defaults::default_error_recover_seconds")]
    pub error_recover_seconds: u64,

    #[serde(default = "defaults::default_uncaught_exception_seconds")]
    pub uncaught_exception_seconds: u64,

    #[serde(default = "defaults::default_asleep_poll_seconds")]
    pub asleep_poll_seconds: u64,

    #[serde(default = "defaults::default_queue_threshold")]
    pub queue_threshold: usize,

    #[serde(default = "defaults::default_database_busy_timeout_seconds")]
    pub database_busy_timeout_seconds: u64,

    #[serde(default = "defaults::default_wal_checkpoint_interval_seconds")]
    pub wal_checkpoint_interval_seconds: u64,

    #[serde(default = "defaults::default_queue_sent_retention_hours")]
    pub queue_sent_retention_hours: i64,

    #[serde(default = "defaults::default_graceful_shutdown_timeout_seconds")]
    pub graceful_shutdown_timeout_seconds: u64,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub pre_task_check: PreTaskCheckConfig,
}

impl WorkerConfig {
    /// Semantic validation beyond what serde/TOML parsing already enforces.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(url) = &self.manager_url {
            validate_url(url)?;
        }

        if !self.worker_id.is_empty() {
            crate::utils::validate_worker_id(&self.worker_id)?;
        }

        if self.worker_id.is_empty() != self.worker_secret.is_empty() {
            return Err(crate::WorkerError::Validation(
                "worker_id and worker_secret must be either both empty or both set".to_string(),
            )
            .into());
        }

        if self.queue_threshold == 0 {
            return Err(
                crate::WorkerError::Validation("queue_threshold must be non-zero".to_string())
                    .into(),
            );
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty TOML document parses against an all-defaults config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.queue_threshold, 10);
        assert_eq!(cfg.asleep_poll_seconds, 30);
        assert_eq!(cfg.error_recover_seconds, 600);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_identity_fields() {
        let mut cfg = WorkerConfig::default();
        cfg.worker_id = "abc".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pre_task_check_splits_by_key_prefix() {
        let toml_str = r#"
            [pre_task_check]
            read_output = "/mnt/output"
            write_scratch = "/mnt/scratch"
        "#;
        let cfg: WorkerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.pre_task_check.read_targets().len(), 1);
        assert_eq!(cfg.pre_task_check.write_targets().len(), 1);
    }

    #[test]
    fn rejects_bad_manager_url() {
        let toml_str = r#"manager_url = "not-a-url""#;
        let cfg: WorkerConfig = toml::from_str(toml_str).unwrap();
        assert!(cfg.validate().is_err());
    }
}
