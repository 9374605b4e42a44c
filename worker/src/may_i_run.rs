//! May-I-Run poller: while a task is running, periodically asks the Manager
//! whether the worker may keep running it. A `may_keep_running: false`
//! response aborts the current task through the shared `TaskRunner` handle;
//! a `status_requested` value is forwarded to the Worker Core so it can
//! drive the same state transition a `/status-change` poll would.

use crate::client::UpstreamClient;
use shared::api::{endpoints, MayIRunResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub enum MayIRunEvent {
    Stopped { reason: Option<String> },
    StatusRequested(String),
}

pub struct MayIRunPoller {
    client: Arc<Mutex<UpstreamClient>>,
    interval: Duration,
}

impl MayIRunPoller {
    pub fn new(client: Arc<Mutex<UpstreamClient>>, interval: Duration) -> Self {
        Self { client, interval }
    }

    /// Poll once and classify the response. Callers loop this on `interval`
    /// for as long as a task is active; a poll failure is logged and
    /// treated as "keep running" rather than aborting on a flaky network.
    pub async fn poll_once(&self, task_id: &str) -> Option<MayIRunEvent> {
        let response = {
            let client = self.client.lock().await;
            client.get_checked(&endpoints::may_i_run(task_id)).await
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!("may-i-run poll for {} failed, assuming permission granted: {}", task_id, e);
                return None;
            }
        };

        let body: MayIRunResponse = match response.json() {
            Ok(b) => b,
            Err(e) => {
                warn!("may-i-run response for {} was malformed: {}", task_id, e);
                return None;
            }
        };

        if !body.may_keep_running {
            debug!("manager revoked permission to run task {}: {:?}", task_id, body.reason);
            return Some(MayIRunEvent::Stopped { reason: body.reason });
        }

        body.status_requested.map(MayIRunEvent::StatusRequested)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_once_returns_none_on_transport_error() {
        let client = Arc::new(Mutex::new(UpstreamClient::new("http://127.0.0.1:1")));
        let poller = MayIRunPoller::new(client, Duration::from_secs(1));
        let event = poller.poll_once("T1").await;
        assert!(event.is_none());
    }
}
