//! Worker Core: the central state machine. Owns the worker's state, the
//! currently-running task (if any), the coalesced activity/log push
//! pipeline, and the fetch/execute loop. Every other component (client,
//! queue, task runner, May-I-Run poller, signal handling) is a collaborator
//! the Core drives from a single `tokio::select!` loop, so worker state
//! itself never needs a lock: only one logical owner ever touches it.

use crate::client::{ClientError, UpstreamClient};
use crate::home_config::{self, HomeConfig};
use crate::may_i_run::{MayIRunEvent, MayIRunPoller};
use crate::pretask;
use crate::queue::UpdateQueue;
use crate::task_runner::TaskRunner;
use rand::Rng;
use shared::api::{
    endpoints, LogEntry, Platform, RegisterWorkerRequest, RegisterWorkerResponse, SignOnRequest,
    StatusChangeResponse, StatusRequested, Task, TaskUpdateRequest,
};
use shared::config::WorkerConfig;
use shared::defaults::OUTPUT_PRODUCED_THROTTLE_SECONDS;
use shared::utils::current_timestamp;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Awake,
    Asleep,
    Error,
    ShuttingDown,
}

impl WorkerState {
    fn as_wire(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Awake => "awake",
            WorkerState::Asleep => "asleep",
            WorkerState::Error => "error",
            WorkerState::ShuttingDown => "shutting-down",
        }
    }
}

/// What the next fetch/execute iteration should do once it fires.
enum FetchOutcome {
    Return,
    Execute(Task),
    StatusRequested(String),
}

struct CurrentTask {
    id: String,
    silently_aborting: bool,
}

/// External events the Core reacts to, all delivered over one channel so
/// the select loop has a single source of truth.
pub enum CoreEvent {
    GoToSleep,
    WakeUp,
    Shutdown,
}

pub struct Worker {
    config: WorkerConfig,
    home_config_path: PathBuf,
    client: Arc<Mutex<UpstreamClient>>,
    queue: Arc<UpdateQueue>,
    queue_consumer: Option<tokio::task::JoinHandle<()>>,
    task_runner: Arc<TaskRunner>,
    state: WorkerState,
    current_task: Option<CurrentTask>,
    current_task_cancel: Option<watch::Sender<bool>>,
    run_single_task: bool,
    log_buffer: Vec<LogEntry>,
    pending_activity: Option<String>,
    pending_status: Option<(String, Option<String>)>,
    last_push_at: Instant,
    last_output_produced_at: Option<Instant>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        home_config_path: PathBuf,
        client: UpstreamClient,
        queue: Arc<UpdateQueue>,
        run_single_task: bool,
    ) -> Self {
        Self {
            config,
            home_config_path,
            client: Arc::new(Mutex::new(client)),
            queue,
            queue_consumer: None,
            task_runner: Arc::new(TaskRunner::new()),
            state: WorkerState::Starting,
            current_task: None,
            current_task_cancel: None,
            run_single_task,
            log_buffer: Vec::new(),
            pending_activity: None,
            pending_status: None,
            last_push_at: Instant::now(),
            last_output_produced_at: None,
        }
    }

    /// Run the startup sequence (§4.5.1): identity acquisition, sign-on,
    /// and the initial status acknowledgement. Returns the state the worker
    /// should move to once the fetch loop starts.
    pub async fn startup(&mut self, initial_state: WorkerState) -> anyhow::Result<()> {
        let mut identity = home_config::load(&self.home_config_path)?;

        if !identity.is_registered() {
            identity = self.register(identity).await?;
        } else {
            self.client().await.set_worker_credentials(identity.worker_id.clone(), identity.worker_secret.clone());
            if let Err(e) = self.sign_on().await {
                if matches!(e.downcast_ref::<ClientError>(), Some(ClientError::Unauthorized)) {
                    warn!("sign-on rejected, re-registering with a fresh secret");
                    identity = self.register(HomeConfig::default()).await?;
                    self.sign_on().await.map_err(|_| anyhow::anyhow!("sign-on rejected twice; giving up"))?;
                } else {
                    return Err(e);
                }
            }
        }

        let _ = identity;

        self.state = initial_state;
        if initial_state != WorkerState::Awake {
            self.ack_status_change().await;
        }

        self.spawn_queue_consumer();
        Ok(())
    }

    /// §4.2: the Update Queue's consumer loop runs continuously in the
    /// background, independent of the fetch/execute loop, draining whatever
    /// is pending as soon as it arrives. Running it as its own task (rather
    /// than a branch of the Core's `tokio::select!`) keeps it delivering
    /// updates even while the Core itself is blocked mid-task-execution.
    fn spawn_queue_consumer(&mut self) {
        let queue = self.queue.clone();
        let client = self.client.clone();
        let retry_delay = Duration::from_secs(self.config.fetch_fail_seconds);
        let idle_poll = Duration::from_secs(1);

        let handle = tokio::spawn(async move {
            loop {
                let result = queue.flush_and_report(retry_delay, None, |entry| deliver_update(&client, entry)).await;
                if let Err(e) = result {
                    error!("update queue consumer failed: {}", e);
                }
                tokio::time::sleep(idle_poll).await;
            }
        });

        self.queue_consumer = Some(handle);
    }

    async fn client(&self) -> tokio::sync::MutexGuard<'_, UpstreamClient> {
        self.client.lock().await
    }

    async fn register(&mut self, mut identity: HomeConfig) -> anyhow::Result<HomeConfig> {
        let secret = generate_worker_secret();
        let platform = Platform::detect().ok_or_else(|| anyhow::anyhow!("unsupported platform"))?;

        {
            let mut client = self.client().await;
            client.clear_auth();
            if let Some(registration_secret) = &self.config.worker_registration_secret {
                let token = crate::client::build_registration_jwt(registration_secret)?;
                client.set_bearer(token);
            }
        }

        let request = RegisterWorkerRequest {
            secret: secret.clone(),
            platform,
            supported_task_types: self.config.task_types.clone(),
            nickname: self.config.nickname.clone(),
        };

        let response = self.retry_registration_call(endpoints::REGISTER_WORKER, &request).await?;
        let body: RegisterWorkerResponse = response.json()?;

        identity.worker_id = body.id;
        identity.worker_secret = secret;
        home_config::save(&self.home_config_path, &identity)?;

        self.client().await.set_worker_credentials(identity.worker_id.clone(), identity.worker_secret.clone());
        Ok(identity)
    }

    async fn sign_on(&mut self) -> anyhow::Result<()> {
        let request = SignOnRequest { supported_task_types: self.config.task_types.clone(), nickname: self.config.nickname.clone() };
        let response = self.client().await.post(endpoints::SIGN_ON, Some(&request)).await;
        match response {
            Ok(r) => {
                crate::client::UpstreamClient::classify(r)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retry a registration-phase call indefinitely on transport/5xx, per
    /// §4.5.1's fixed backoff; 403 and other 4xx are fatal.
    async fn retry_registration_call<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> anyhow::Result<crate::client::RawResponse> {
        loop {
            let result = {
                let client = self.client().await;
                client.post(path, Some(body)).await
            };
            match result.map(crate::client::UpstreamClient::classify) {
                Ok(Ok(r)) => return Ok(r),
                Ok(Err(ClientError::Http4xx { status: 403, body })) => {
                    anyhow::bail!("registration rejected (bad registration secret): {}", body)
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("registration call to {} failed, retrying in {}s: {}", path, self.config.register_retry_seconds, e);
                    tokio::time::sleep(Duration::from_secs(self.config.register_retry_seconds)).await;
                }
                Ok(Err(e)) => anyhow::bail!("registration call to {} rejected: {}", path, e),
                Err(e) => anyhow::bail!("registration call to {} failed: {}", path, e),
            }
        }
    }

    async fn ack_status_change(&self) {
        let path = endpoints::ack_status_change(self.state.as_wire());
        let client = self.client().await;
        if let Err(e) = client.post::<()>(&path, None).await {
            warn!("failed to acknowledge status change to {}: {}", self.state.as_wire(), e);
        }
    }

    /// Main loop: while not SHUTTING_DOWN, dispatch one fetch/execute
    /// iteration when AWAKE, or poll for status changes when ASLEEP/ERROR.
    pub async fn run(&mut self, mut events: tokio::sync::mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        loop {
            match self.state {
                WorkerState::ShuttingDown => break,
                WorkerState::Awake => {
                    tokio::select! {
                        event = events.recv() => {
                            if let Some(event) = event { self.handle_event(event).await; } else { break; }
                        }
                        outcome = self.fetch_and_decide() => {
                            self.act_on_fetch_outcome(outcome).await;
                        }
                    }
                }
                WorkerState::Asleep | WorkerState::Error => {
                    let poll_delay = if self.state == WorkerState::Error {
                        Duration::from_secs(self.config.error_recover_seconds)
                    } else {
                        Duration::from_secs(self.config.asleep_poll_seconds)
                    };

                    tokio::select! {
                        event = events.recv() => {
                            if let Some(event) = event { self.handle_event(event).await; } else { break; }
                        }
                        _ = tokio::time::sleep(poll_delay) => {
                            if self.state == WorkerState::Error {
                                self.transition(WorkerState::Awake).await;
                            } else {
                                self.poll_status_change().await;
                            }
                        }
                    }
                }
                WorkerState::Starting => unreachable!("startup() must run before run()"),
            }
        }

        self.shutdown().await
    }

    async fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::GoToSleep if self.state == WorkerState::Awake => self.transition(WorkerState::Asleep).await,
            CoreEvent::WakeUp if matches!(self.state, WorkerState::Asleep | WorkerState::Error) => {
                self.transition(WorkerState::Awake).await
            }
            CoreEvent::Shutdown => self.transition(WorkerState::ShuttingDown).await,
            _ => {}
        }
    }

    async fn transition(&mut self, to: WorkerState) {
        info!("worker state {:?} -> {:?}", self.state, to);
        self.state = to;
        if !matches!(to, WorkerState::Starting | WorkerState::ShuttingDown) {
            self.ack_status_change().await;
        }
    }

    async fn poll_status_change(&mut self) {
        let response = self.client().await.get(endpoints::STATUS_CHANGE).await;
        match response {
            Ok(r) if r.status.as_u16() == 204 => {}
            Ok(r) if r.status.is_success() => match r.json::<StatusChangeResponse>() {
                Ok(body) => self.apply_status_requested(body.status_requested).await,
                Err(e) => warn!("malformed status-change response: {}", e),
            },
            Ok(r) => warn!("status-change poll returned unexpected status {}", r.status),
            Err(e) => warn!("status-change poll failed: {}", e),
        }
    }

    async fn apply_status_requested(&mut self, status: String) {
        match status.as_str() {
            "awake" => self.transition(WorkerState::Awake).await,
            "asleep" => self.transition(WorkerState::Asleep).await,
            "shutdown" => self.transition(WorkerState::ShuttingDown).await,
            other => warn!("ignoring unrecognized status_requested: {}", other),
        }
    }

    /// One iteration of §4.5.2, steps 1-4: decide whether to return early,
    /// back off, or hand the Core a task to execute.
    async fn fetch_and_decide(&mut self) -> FetchOutcome {
        if self.state != WorkerState::Awake {
            return FetchOutcome::Return;
        }

        match self.queue.queue_size() {
            Ok(size) if size > self.config.queue_threshold => {
                tokio::time::sleep(Duration::from_secs(self.config.fetch_fail_seconds)).await;
                return FetchOutcome::Return;
            }
            Err(e) => warn!("failed to read queue size: {}", e),
            _ => {}
        }

        if let Err(failure) = pretask::run(&self.config.pre_task_check) {
            error!("pre-task check failed: {}", failure);
            self.transition(WorkerState::Error).await;
            return FetchOutcome::Return;
        }

        let response = self.client().await.post::<()>(endpoints::TASK, None).await;
        match response {
            Ok(r) if r.status.as_u16() == 200 => match r.json::<Task>() {
                Ok(task) => FetchOutcome::Execute(task),
                Err(e) => {
                    warn!("malformed task payload: {}", e);
                    tokio::time::sleep(Duration::from_secs(self.config.fetch_fail_seconds)).await;
                    FetchOutcome::Return
                }
            },
            Ok(r) if r.status.as_u16() == 204 => {
                tokio::time::sleep(Duration::from_secs(self.config.fetch_empty_seconds)).await;
                FetchOutcome::Return
            }
            Ok(r) if r.status.as_u16() == 423 => match r.json::<StatusRequested>() {
                Ok(body) => FetchOutcome::StatusRequested(body.status_requested),
                Err(e) => {
                    warn!("malformed 423 body: {}", e);
                    FetchOutcome::Return
                }
            },
            Ok(r) => {
                warn!("unexpected /task response: {}", r.status);
                tokio::time::sleep(Duration::from_secs(self.config.fetch_fail_seconds)).await;
                FetchOutcome::Return
            }
            Err(e) => {
                warn!("/task call failed: {}", e);
                tokio::time::sleep(Duration::from_secs(self.config.fetch_fail_seconds)).await;
                FetchOutcome::Return
            }
        }
    }

    async fn act_on_fetch_outcome(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Return => {}
            FetchOutcome::StatusRequested(status) => self.apply_status_requested(status).await,
            FetchOutcome::Execute(task) => {
                self.execute_task(task).await;
                if self.run_single_task {
                    self.transition(WorkerState::ShuttingDown).await;
                } else if self.state == WorkerState::Awake {
                    tokio::time::sleep(Duration::from_secs(self.config.fetch_done_seconds)).await;
                }
            }
        }
    }

    /// §4.5.2 step 5: run a task to completion, reporting active/completed/
    /// failed status, with the May-I-Run poller running alongside as a
    /// background task that feeds events back over an mpsc channel. Keeping
    /// the poller out-of-line means the execution future only ever borrows
    /// the shared `Arc<TaskRunner>`, leaving `&mut self` free for the event
    /// loop to drive `apply_status_requested`/`append_log` as events arrive.
    async fn execute_task(&mut self, task: Task) {
        self.current_task = Some(CurrentTask { id: task.id.clone(), silently_aborting: false });
        self.push_status("active", Some(0));
        self.push_now().await;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.current_task_cancel = Some(cancel_tx);

        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let poller = MayIRunPoller::new(self.client.clone(), Duration::from_secs(self.config.may_i_run_interval_seconds));
        let task_id = task.id.clone();
        let poll_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poller.interval()).await;
                match poller.poll_once(&task_id).await {
                    Some(event) => {
                        let stop = matches!(event, MayIRunEvent::Stopped { .. });
                        if event_tx.send(event).is_err() || stop {
                            return;
                        }
                    }
                    None => {}
                }
            }
        });

        let runner = self.task_runner.clone();
        let execution = runner.execute(&task, cancel_rx);
        tokio::pin!(execution);

        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break outcome,
                event = event_rx.recv() => {
                    match event {
                        Some(MayIRunEvent::Stopped { reason }) => {
                            if let Some(current) = &mut self.current_task {
                                current.silently_aborting = true;
                            }
                            let reason = reason.unwrap_or_else(|| "manager revoked permission".to_string());
                            self.append_log(format!("task {} no longer allowed to run: {}", task.id, reason));
                            if let Some(tx) = &self.current_task_cancel {
                                let _ = tx.send(true);
                            }
                            let _ = self.client().await.post_checked::<()>(&endpoints::task_return(&task.id), None).await;
                        }
                        Some(MayIRunEvent::StatusRequested(status)) => {
                            self.apply_status_requested(status).await;
                        }
                        None => {}
                    }
                }
            }
        };

        poll_handle.abort();
        self.current_task_cancel = None;

        let silently_aborting = self.current_task.as_ref().map(|t| t.silently_aborting).unwrap_or(false);

        if outcome.aborted {
            if !silently_aborting && self.state != WorkerState::ShuttingDown {
                self.push_status("canceled", None);
            }
        } else if outcome.success {
            self.append_log(format!("task {} completed with timing {:?}", task.id, outcome.timing));
            self.push_activity_and_status("completed", "Task completed");
        } else {
            let reason = outcome.error.unwrap_or_else(|| "unknown failure".to_string());
            self.append_log(reason.clone());
            self.push_activity_and_status("failed", &reason);
        }

        // push_now() still needs `current_task` for the task id and the
        // silently-aborting suppression check, so clear it only afterward.
        self.push_now().await;
        self.current_task = None;
    }

    /// §4.5.6: abort the named task if it is the one currently running.
    pub async fn stop_current_task(&mut self, task_id: &str) {
        let Some(current) = &mut self.current_task else { return };
        if current.id != task_id {
            return;
        }
        current.silently_aborting = true;
        if let Some(tx) = &self.current_task_cancel {
            let _ = tx.send(true);
        }
        self.append_log(format!("task {} no longer allowed to run: stopped by operator", task_id));

        let response = self.client().await.post::<()>(&endpoints::task_return(task_id), None).await;
        match response {
            Ok(r) if r.status.as_u16() == 204 => {}
            Ok(r) => warn!("unexpected /tasks/{}/return response: {}", task_id, r.status),
            Err(e) => warn!("/tasks/{}/return failed: {}", task_id, e),
        }
    }

    /// §4.5.7: throttled output-produced notification.
    pub async fn output_produced(&mut self, paths: Vec<String>) {
        if let Some(last) = self.last_output_produced_at {
            if last.elapsed() < Duration::from_secs(OUTPUT_PRODUCED_THROTTLE_SECONDS) {
                return;
            }
        }
        self.last_output_produced_at = Some(Instant::now());

        let request = shared::api::OutputProducedRequest { paths };
        let client = self.client().await;
        if let Err(e) = client.post_checked(&endpoints::OUTPUT_PRODUCED, Some(&request)).await {
            warn!("output-produced notification failed: {}", e);
        }
    }

    fn push_status(&mut self, status: &str, command_idx: Option<usize>) {
        self.pending_status = Some((status.to_string(), None));
        let _ = command_idx;
    }

    fn push_activity_and_status(&mut self, status: &str, activity: &str) {
        self.pending_status = Some((status.to_string(), None));
        self.pending_activity = Some(activity.to_string());
    }

    fn append_log(&mut self, text: String) {
        self.log_buffer.push(LogEntry { timestamp_utc: iso_now(), text });
    }

    /// Build and enqueue one coalesced update payload, clearing all pending
    /// sources. §4.5.4: a status-changing push always goes out immediately,
    /// which is every caller here — the delayed-push timers for
    /// activity-only/log-only updates are a Worker Core refinement not
    /// exercised by the task lifecycle paths above.
    async fn push_now(&mut self) {
        if self.pending_status.is_none() && self.pending_activity.is_none() && self.log_buffer.is_empty() {
            return;
        }

        let task_id = match &self.current_task {
            Some(t) => t.id.clone(),
            None => return,
        };

        let silently_aborting = self.current_task.as_ref().map(|t| t.silently_aborting).unwrap_or(false);

        let request = if silently_aborting {
            TaskUpdateRequest { log: std::mem::take(&mut self.log_buffer), ..Default::default() }
        } else {
            TaskUpdateRequest {
                task_status: self.pending_status.take().map(|(s, _)| s),
                activity: self.pending_activity.take(),
                log: std::mem::take(&mut self.log_buffer),
                ..Default::default()
            }
        };

        if let Ok(payload) = serde_json::to_string(&request) {
            if let Err(e) = self.queue.enqueue(&task_id, &endpoints::task_update(&task_id), &payload) {
                error!("failed to enqueue update for task {}: {}", task_id, e);
            }
        }
        self.last_push_at = Instant::now();
    }

    /// §4.2's "single concurrent consumer" means the background consumer
    /// must stop before the bounded shutdown flush starts, so the two never
    /// race over the same oldest entry.
    async fn shutdown(&mut self) {
        info!("shutting down");
        if let Some(handle) = self.queue_consumer.take() {
            handle.abort();
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.graceful_shutdown_timeout_seconds);
        let client = self.client.clone();
        let retry_delay = Duration::from_secs(self.config.fetch_fail_seconds);
        let result = self.queue.flush_and_report(retry_delay, Some(deadline), |entry| deliver_update(&client, entry)).await;
        if let Err(e) = result {
            error!("update queue flush failed during shutdown: {}", e);
        }

        let client = self.client().await;
        if let Err(e) = client.post::<()>(endpoints::SIGN_OFF, None).await {
            warn!("sign-off failed: {}", e);
        }
    }
}

/// Deliver one queued update to the Manager. Shared between the background
/// queue consumer and the bounded shutdown flush.
async fn deliver_update(client: &Arc<Mutex<UpstreamClient>>, entry: crate::queue::QueueEntry) -> Result<(), ClientError> {
    let body: serde_json::Value = serde_json::from_str(&entry.payload)
        .map_err(|e| ClientError::Malformed(format!("queue entry {} for {}: {}", entry.id, entry.path, e)))?;
    let client = client.lock().await;
    client.post_checked::<serde_json::Value>(&entry.path, Some(&body)).await?;
    Ok(())
}

fn generate_worker_secret() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..64).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

fn iso_now() -> String {
    let secs = current_timestamp();
    chrono::DateTime::from_timestamp(secs as i64, 0).map(|d| d.to_rfc3339()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_64_chars_of_alphanumerics() {
        let secret = generate_worker_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn state_wire_names_match_manager_contract() {
        assert_eq!(WorkerState::Asleep.as_wire(), "asleep");
        assert_eq!(WorkerState::Error.as_wire(), "error");
    }

    /// §8 scenario 1: a full fetch/execute/complete cycle against a fake
    /// Manager enqueues exactly two updates — the "active" status at task
    /// start and the "completed" status at task end.
    #[tokio::test]
    async fn happy_path_fetch_execute_complete_pushes_exactly_two_updates() {
        use axum::extract::Path;
        use axum::response::IntoResponse;
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use shared::api::{MayIRunResponse, RegisterWorkerResponse};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex as StdMutex;

        let task_requests = Arc::new(AtomicUsize::new(0));
        let updates: Arc<StdMutex<Vec<TaskUpdateRequest>>> = Arc::new(StdMutex::new(Vec::new()));

        let task_requests_for_route = task_requests.clone();
        let updates_for_route = updates.clone();

        let app = Router::new()
            .route(
                "/register-worker",
                post(|| async { Json(RegisterWorkerResponse { id: "W1".to_string() }) }),
            )
            .route("/sign-on", post(|| async { axum::http::StatusCode::OK }))
            .route(
                "/ack-status-change/{state}",
                post(|Path(_state): Path<String>| async { axum::http::StatusCode::OK }),
            )
            .route(
                "/task",
                post(move || {
                    let task_requests = task_requests_for_route.clone();
                    async move {
                        if task_requests.fetch_add(1, Ordering::SeqCst) == 0 {
                            Json(Task {
                                id: "T1".to_string(),
                                commands: vec![Command {
                                    name: "echo".to_string(),
                                    settings: serde_json::json!({"message": "hi"}),
                                }],
                                metadata: serde_json::Value::Null,
                            })
                            .into_response()
                        } else {
                            axum::http::StatusCode::NO_CONTENT.into_response()
                        }
                    }
                }),
            )
            .route(
                "/tasks/{id}/update",
                post(move |Json(body): Json<TaskUpdateRequest>| {
                    let updates = updates_for_route.clone();
                    async move {
                        updates.lock().unwrap().push(body);
                        axum::http::StatusCode::OK
                    }
                }),
            )
            .route(
                "/tasks/{id}/return",
                post(|Path(_id): Path<String>| async { axum::http::StatusCode::NO_CONTENT }),
            )
            .route(
                "/may-i-run/{id}",
                get(|Path(_id): Path<String>| async {
                    Json(MayIRunResponse { may_keep_running: true, reason: None, status_requested: None })
                }),
            )
            .route("/status-change", get(|| async { axum::http::StatusCode::NO_CONTENT }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = UpstreamClient::new(format!("http://{}", addr));
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(UpdateQueue::open(&dir.path().join("queue.db"), 5, 24).unwrap());
        let home_path = dir.path().join("home.toml");

        let mut config = WorkerConfig::default();
        config.may_i_run_interval_seconds = 3600;
        let mut worker = Worker::new(config, home_path, client, queue, true);

        worker.startup(WorkerState::Awake).await.unwrap();

        let outcome = worker.fetch_and_decide().await;
        worker.act_on_fetch_outcome(outcome).await;

        // give the background queue consumer a moment to deliver both pushes
        for _ in 0..50 {
            if updates.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let delivered = updates.lock().unwrap().clone();
        assert_eq!(delivered.len(), 2, "expected exactly two enqueued updates, got {:?}", delivered);
        assert_eq!(delivered[0].task_status.as_deref(), Some("active"));
        assert_eq!(delivered[1].task_status.as_deref(), Some("completed"));
        assert_eq!(task_requests.load(Ordering::SeqCst), 1);
    }
}
