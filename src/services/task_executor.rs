//! Admission-controlled, concurrency-bounded task executor.
//!
//! `submit` runs the full admission pipeline (screening, rate limit,
//! handler lookup, RBAC, materialisation) before a task row exists.
//! Execution races the handler against a per-task timeout and an abort
//! token; whichever resolves first decides the terminal state and
//! second-wins resolutions are dropped.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditDraft, AuditEvent, ExecutorConfig, PermissionCheck, ResourceUsage, SecurityContext,
    Task, TaskOutcome, TaskStatus, TaskType,
};
use crate::domain::ports::TaskRepository;
use crate::services::audit_chain::{sha256_hex_of_value, AuditChain};
use crate::services::input_validator::InputValidator;
use crate::services::rate_limiter::RateLimiterService;
use crate::services::rbac::RbacService;
use crate::services::sandbox::Sandbox;

/// Rate rule every submission is admitted under.
const TASK_CREATION_RULE: &str = "task_creation";

/// Capacity of the task event fanout.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Submission request. The input itself never reaches storage; only its
/// hash does.
#[derive(Debug, Clone)]
pub struct SubmitTask {
    pub task_type: TaskType,
    pub name: String,
    pub description: Option<String>,
    pub input: Value,
    pub timeout_ms: Option<u64>,
    pub correlation_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
}

impl SubmitTask {
    pub fn new(task_type: TaskType, name: impl Into<String>, input: Value) -> Self {
        Self {
            task_type,
            name: name.into(),
            description: None,
            input,
            timeout_ms: None,
            correlation_id: None,
            parent_task_id: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Context handed to handlers. The cancellation token fires on timeout or
/// external cancel; cooperative handlers observe it at suspension points.
#[derive(Clone)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub security: SecurityContext,
    pub cancellation: CancellationToken,
}

/// A unit-of-work implementation registered per task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Permissions the submitting principal must hold.
    fn required_permissions(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    async fn execute(
        &self,
        task: &Task,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> DomainResult<Value>;
}

/// Broadcast on every status change; consumed by the gateway hub and by
/// `wait_for_terminal`.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task: Task,
}

struct ActiveTask {
    cancel: CancellationToken,
}

struct QueuedTask {
    task: Task,
    input: Value,
}

/// The executor. Shared behind an `Arc`; execution tasks are spawned onto
/// the runtime and re-drive the queue as they finish.
pub struct TaskExecutor {
    config: ExecutorConfig,
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
    active: Mutex<HashMap<Uuid, ActiveTask>>,
    queue: Mutex<VecDeque<QueuedTask>>,
    /// Re-entrancy guard for the queue drain.
    processing: AtomicBool,
    validator: Arc<InputValidator>,
    limiter: Arc<RateLimiterService>,
    rbac: Arc<RbacService>,
    audit: Arc<AuditChain>,
    sandbox: Option<Sandbox>,
    repo: Arc<dyn TaskRepository>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        validator: Arc<InputValidator>,
        limiter: Arc<RateLimiterService>,
        rbac: Arc<RbacService>,
        audit: Arc<AuditChain>,
        repo: Arc<dyn TaskRepository>,
    ) -> Arc<Self> {
        let sandbox = config
            .sandbox
            .enabled
            .then(|| Sandbox::new(config.sandbox.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            validator,
            limiter,
            rbac,
            audit,
            sandbox,
            repo,
            events,
        })
    }

    /// Register the handler for a task type, replacing any previous one.
    pub async fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().await.insert(task_type, handler);
    }

    /// Subscribe to task status events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Admission pipeline. Returns the pending task; its eventual terminal
    /// state arrives via events or `wait_for_terminal`.
    pub async fn submit(
        self: &Arc<Self>,
        create: SubmitTask,
        security: SecurityContext,
    ) -> DomainResult<Task> {
        // 1. Screen untrusted strings before anything is persisted
        let input_text = serde_json::to_string(&create.input).unwrap_or_default();
        for candidate in [create.name.as_str(), input_text.as_str()] {
            let screened = self.validator.validate(candidate);
            if !screened.valid {
                let reason = screened
                    .block_reason
                    .unwrap_or_else(|| "blocked input".to_string());
                self.audit
                    .record(
                        AuditDraft::warn(
                            AuditEvent::TaskRejected,
                            format!("task submission rejected: {reason}"),
                        )
                        .with_user(&security.user_id),
                    )
                    .await?;
                return Err(DomainError::Validation(reason));
            }
        }

        // 2. Rate limit per submitting user
        let decision = self.limiter.check(TASK_CREATION_RULE, &security).await?;
        if !decision.allowed {
            self.audit
                .record(
                    AuditDraft::warn(
                        AuditEvent::TaskRateLimited,
                        format!(
                            "task submission rate limited for {} ({}s back-off)",
                            security.user_id, decision.retry_after_secs
                        ),
                    )
                    .with_user(&security.user_id),
                )
                .await?;
            return Err(DomainError::RateLimited {
                rule: TASK_CREATION_RULE.to_string(),
                retry_after_secs: decision.retry_after_secs,
            });
        }

        // 3. Resolve the handler
        let handler = self
            .handlers
            .read()
            .await
            .get(&create.task_type)
            .cloned()
            .ok_or_else(|| {
                DomainError::not_found("task handler", create.task_type.as_str())
            })?;

        // 4. Enforce every required permission
        let required = handler.required_permissions();
        for (resource, action) in &required {
            if let Err(err) = self
                .rbac
                .require_permission(
                    &security.role,
                    &PermissionCheck::new(resource.clone(), action.clone()),
                    Some(&security.user_id),
                )
                .await
            {
                self.audit
                    .record(
                        AuditDraft::warn(
                            AuditEvent::PermissionDenied,
                            format!(
                                "task submission denied: role '{}' lacks {resource}:{action}",
                                security.role
                            ),
                        )
                        .with_user(&security.user_id),
                    )
                    .await?;
                return Err(err);
            }
        }

        // 5. Materialise the task. A parent, when named, must exist.
        if let Some(parent_id) = create.parent_task_id {
            if self.repo.get(parent_id).await?.is_none() {
                return Err(DomainError::Validation(format!(
                    "parent task {parent_id} does not exist"
                )));
            }
        }
        let timeout_ms = create
            .timeout_ms
            .unwrap_or(self.config.default_timeout_ms)
            .min(self.config.max_timeout_ms);
        let asserted: Vec<String> = required
            .iter()
            .map(|(resource, action)| format!("{resource}:{action}"))
            .collect();
        let mut task = Task::new(
            create.task_type,
            create.name,
            sha256_hex_of_value(&create.input),
            timeout_ms,
            SecurityContext {
                permissions: asserted,
                ..security.clone()
            },
        );
        task.description = create.description;
        task.correlation_id = create.correlation_id;
        task.parent_id = create.parent_task_id;

        // 6. Persist and audit; an unaudited task never runs
        self.repo.create(&task).await?;
        self.audit
            .record(
                AuditDraft::info(AuditEvent::TaskCreated, format!("task '{}' created", task.name))
                    .with_user(&security.user_id)
                    .with_task(task.id.to_string())
                    .with_metadata("type", Value::String(task.task_type.as_str().into()))
                    .with_metadata("timeout_ms", Value::from(timeout_ms)),
            )
            .await?;

        self.queue.lock().await.push_back(QueuedTask {
            task: task.clone(),
            input: create.input,
        });
        self.process_queue().await;

        Ok(task)
    }

    /// Drain the queue while capacity allows. Re-entrant safe via the
    /// processing flag; re-polls after releasing it to cover items
    /// enqueued during the flush.
    pub async fn process_queue(self: &Arc<Self>) {
        loop {
            if self
                .processing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            loop {
                let next = {
                    let active = self.active.lock().await;
                    if active.len() >= self.config.max_concurrent {
                        None
                    } else {
                        drop(active);
                        self.queue.lock().await.pop_front()
                    }
                };
                let Some(item) = next else { break };
                self.launch(item).await;
            }

            self.processing.store(false, Ordering::SeqCst);

            let has_backlog = !self.queue.lock().await.is_empty();
            let has_capacity = self.active.lock().await.len() < self.config.max_concurrent;
            if !(has_backlog && has_capacity) {
                return;
            }
        }
    }

    async fn launch(self: &Arc<Self>, item: QueuedTask) {
        let cancel = CancellationToken::new();
        self.active.lock().await.insert(
            item.task.id,
            ActiveTask {
                cancel: cancel.clone(),
            },
        );

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.execute_task(item.task, item.input, cancel).await;
        });
    }

    /// Run one task to a terminal state.
    async fn execute_task(self: Arc<Self>, mut task: Task, input: Value, cancel: CancellationToken) {
        task.start();
        if let Err(err) = self.repo.update(&task).await {
            tracing::error!(task_id = %task.id, error = %err, "failed to persist running state");
        }
        self.publish(&task);

        let handler = self.handlers.read().await.get(&task.task_type).cloned();
        let timeout = std::time::Duration::from_millis(task.timeout_ms);

        enum Resolution {
            Finished(DomainResult<Value>, Vec<String>, ResourceUsage),
            TimedOut,
            Aborted,
        }

        let resolution = match handler {
            Some(handler) => {
                let ctx = ExecutionContext {
                    task_id: task.id,
                    security: task.security.clone(),
                    cancellation: cancel.clone(),
                };
                tokio::select! {
                    outcome = self.run_handler(&handler, &task, &input, &ctx) => {
                        Resolution::Finished(outcome.0, outcome.1, outcome.2)
                    }
                    () = tokio::time::sleep(timeout) => Resolution::TimedOut,
                    () = cancel.cancelled() => Resolution::Aborted,
                }
            }
            // Handler unregistered between admission and execution
            None => Resolution::Finished(
                Err(DomainError::not_found("task handler", task.task_type.as_str())),
                Vec::new(),
                ResourceUsage::default(),
            ),
        };

        let (status, outcome, usage, audit_draft) = match resolution {
            Resolution::Finished(Ok(output), violations, usage) => {
                let draft = AuditDraft::info(
                    AuditEvent::TaskCompleted,
                    format!("task '{}' completed", task.name),
                );
                self.audit_violations(&task, &violations).await;
                (
                    TaskStatus::Completed,
                    TaskOutcome::success(sha256_hex_of_value(&output)),
                    usage,
                    draft,
                )
            }
            Resolution::Finished(Err(err), violations, usage) => {
                self.audit_violations(&task, &violations).await;
                let draft = AuditDraft::error(
                    AuditEvent::TaskFailed,
                    format!("task '{}' failed: {err}", task.name),
                );
                (
                    TaskStatus::Failed,
                    TaskOutcome::failure("EXECUTION_ERROR", err.to_string(), err.recoverable()),
                    usage,
                    draft,
                )
            }
            Resolution::TimedOut => (
                TaskStatus::Timeout,
                TaskOutcome::failure("TIMEOUT", "Task timeout", true),
                ResourceUsage::default(),
                AuditDraft::warn(
                    AuditEvent::TaskTimeout,
                    format!("task '{}' exceeded {}ms", task.name, task.timeout_ms),
                ),
            ),
            Resolution::Aborted => (
                TaskStatus::Cancelled,
                TaskOutcome::failure("CANCELLED", "Task cancelled", false),
                ResourceUsage::default(),
                AuditDraft::info(
                    AuditEvent::TaskCancelled,
                    format!("task '{}' cancelled", task.name),
                ),
            ),
        };

        // A failed audit write means the terminal state is not
        // acknowledged as-is; the task is recorded failed instead.
        let audit_result = self
            .audit
            .record(
                audit_draft
                    .with_user(&task.security.user_id)
                    .with_task(task.id.to_string()),
            )
            .await;

        match audit_result {
            Ok(_) => {
                task.finish(status, outcome);
                task.resources = Some(usage);
            }
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "audit write failed at terminal transition");
                task.finish(
                    TaskStatus::Failed,
                    TaskOutcome::failure("AUDIT_WRITE_FAILED", err.to_string(), true),
                );
            }
        }

        if let Err(err) = self.repo.update(&task).await {
            tracing::error!(task_id = %task.id, error = %err, "failed to persist terminal state");
        }

        self.active.lock().await.remove(&task.id);
        self.publish(&task);
        self.process_queue().await;
    }

    async fn run_handler(
        &self,
        handler: &Arc<dyn TaskHandler>,
        task: &Task,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> (DomainResult<Value>, Vec<String>, ResourceUsage) {
        match &self.sandbox {
            Some(sandbox) => {
                let outcome = sandbox
                    .run(task.name.as_str(), handler.execute(task, input, ctx))
                    .await;
                let violations = outcome
                    .violations
                    .iter()
                    .map(|v| format!("{}: {}", v.kind, v.detail))
                    .collect();
                (outcome.result, violations, outcome.usage)
            }
            None => (
                handler.execute(task, input, ctx).await,
                Vec::new(),
                ResourceUsage::default(),
            ),
        }
    }

    async fn audit_violations(&self, task: &Task, violations: &[String]) {
        if violations.is_empty() {
            return;
        }
        let result = self
            .audit
            .record(
                AuditDraft::warn(
                    AuditEvent::SandboxViolation,
                    format!("task '{}' exceeded sandbox caps", task.name),
                )
                .with_user(&task.security.user_id)
                .with_task(task.id.to_string())
                .with_metadata("violations", serde_json::json!(violations)),
            )
            .await;
        if let Err(err) = result {
            tracing::error!(task_id = %task.id, error = %err, "failed to audit sandbox violation");
        }
    }

    /// Cancel an active task. `false` when the task is not active (never
    /// admitted here, or already terminal).
    pub async fn cancel(&self, task_id: Uuid, security: &SecurityContext) -> DomainResult<bool> {
        let token = {
            let active = self.active.lock().await;
            match active.get(&task_id) {
                Some(entry) => entry.cancel.clone(),
                None => return Ok(false),
            }
        };

        if let Err(err) = self
            .rbac
            .require_permission(
                &security.role,
                &PermissionCheck::new("tasks", "cancel"),
                Some(&security.user_id),
            )
            .await
        {
            self.audit
                .record(
                    AuditDraft::warn(
                        AuditEvent::PermissionDenied,
                        format!("role '{}' may not cancel tasks", security.role),
                    )
                    .with_user(&security.user_id)
                    .with_task(task_id.to_string()),
                )
                .await?;
            return Err(err);
        }

        token.cancel();
        Ok(true)
    }

    /// Await the terminal state of a task. Resolves immediately when the
    /// task is already terminal.
    pub async fn wait_for_terminal(&self, task_id: Uuid) -> DomainResult<Task> {
        let mut events = self.events.subscribe();

        if let Some(task) = self.repo.get(task_id).await? {
            if task.status.is_terminal() {
                return Ok(task);
            }
        }

        loop {
            match events.recv().await {
                Ok(event) if event.task.id == task_id && event.task.status.is_terminal() => {
                    return Ok(event.task);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Missed events; fall back to the repository
                    if let Some(task) = self.repo.get(task_id).await? {
                        if task.status.is_terminal() {
                            return Ok(task);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(DomainError::DependencyUnavailable(
                        "task event channel closed".into(),
                    ));
                }
            }
        }
    }

    fn publish(&self, task: &Task) {
        // No subscribers is fine; send only fails then
        let _ = self.events.send(TaskEvent { task: task.clone() });
    }
}
