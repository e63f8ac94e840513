//! Sub-agent delegation: one LLM invocation under a named profile, with
//! depth and token-budget enforcement and a full message trace.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditDraft, AuditEvent, Delegation, DelegationMessage, DelegationStatus, MessageRole,
    TokenUsage,
};
use crate::domain::ports::{
    CompletionRequest, DelegationRepository, LlmClient, ProfileRepository, ToolCall,
};
use crate::services::audit_chain::AuditChain;

/// Delegation service limits.
#[derive(Debug, Clone)]
pub struct DelegationConfig {
    pub max_depth: u32,
    pub default_timeout_ms: u64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            default_timeout_ms: 120_000,
        }
    }
}

/// One delegation request.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub profile: String,
    pub task: String,
    pub context: Option<String>,
    pub max_token_budget: Option<u64>,
    pub model_override: Option<String>,
    pub parent_delegation_id: Option<Uuid>,
    pub timeout_ms: Option<u64>,
}

impl DelegationRequest {
    pub fn new(profile: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            task: task.into(),
            context: None,
            max_token_budget: None,
            model_override: None,
            parent_delegation_id: None,
            timeout_ms: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_budget(mut self, budget: u64) -> Self {
        self.max_token_budget = Some(budget);
        self
    }

    pub fn with_model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_delegation_id = Some(parent);
        self
    }
}

enum InvokeOutcome {
    Done(DomainResult<crate::domain::ports::CompletionResponse>),
    Cancelled,
}

/// What a delegation produced.
#[derive(Debug, Clone)]
pub struct DelegationOutcome {
    pub delegation_id: Uuid,
    pub status: DelegationStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tokens: TokenUsage,
}

/// Runs delegations against the LLM client port.
pub struct DelegationService {
    profiles: Arc<dyn ProfileRepository>,
    repo: Arc<dyn DelegationRepository>,
    llm: Arc<dyn LlmClient>,
    audit: Arc<AuditChain>,
    config: DelegationConfig,
}

impl DelegationService {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        repo: Arc<dyn DelegationRepository>,
        llm: Arc<dyn LlmClient>,
        audit: Arc<AuditChain>,
        config: DelegationConfig,
    ) -> Self {
        Self {
            profiles,
            repo,
            llm,
            audit,
            config,
        }
    }

    /// Run one delegation to a terminal state. Cooperates with the given
    /// cancellation token when present (swarm cancellation path).
    pub async fn delegate(
        &self,
        request: DelegationRequest,
        cancel: Option<CancellationToken>,
    ) -> DomainResult<DelegationOutcome> {
        let profile = self
            .profiles
            .get_by_name(&request.profile)
            .await?
            .ok_or_else(|| DomainError::not_found("agent profile", &request.profile))?;

        // Depth is strictly increasing down the tree, bounded by config
        let (depth, root_id) = match request.parent_delegation_id {
            Some(parent_id) => {
                let parent = self
                    .repo
                    .get(parent_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::not_found("delegation", parent_id.to_string())
                    })?;
                (parent.depth + 1, self.find_root(&parent).await?)
            }
            None => (0, None),
        };
        if depth > self.config.max_depth {
            return Err(DomainError::Validation(format!(
                "delegation depth {depth} exceeds maximum {}",
                self.config.max_depth
            )));
        }

        let token_budget = request
            .max_token_budget
            .unwrap_or(profile.max_token_budget)
            .min(profile.max_token_budget);

        // Tree-wide admission: a new child is only admitted while the
        // root's budget has headroom
        if let Some(root) = &root_id {
            let used = self.repo.tree_token_usage(root.id).await?;
            if used.total() >= root.token_budget {
                return Err(DomainError::Validation(format!(
                    "delegation tree budget exhausted ({} of {} tokens used)",
                    used.total(),
                    root.token_budget
                )));
            }
        }

        let timeout_ms = request.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let model = request
            .model_override
            .clone()
            .unwrap_or_else(|| profile.default_model.clone());

        let mut delegation = Delegation::new(
            profile.id,
            profile.name.clone(),
            request.task.clone(),
            depth,
            self.config.max_depth,
            token_budget,
            timeout_ms,
            model.clone(),
        );
        if let Some(parent_id) = request.parent_delegation_id {
            delegation = delegation.with_parent(parent_id);
        }
        if let Some(context) = &request.context {
            delegation = delegation.with_context(context.clone());
        }

        self.repo.create(&delegation).await?;
        delegation.start();
        self.repo.update(&delegation).await?;
        self.audit
            .record(
                AuditDraft::info(
                    AuditEvent::DelegationStarted,
                    format!("delegation to '{}' started", profile.name),
                )
                .with_task(delegation.id.to_string())
                .with_metadata("depth", serde_json::Value::from(depth))
                .with_metadata("budget", serde_json::Value::from(token_budget)),
            )
            .await?;

        self.trace(
            &delegation,
            0,
            MessageRole::System,
            profile.system_prompt.clone(),
            None,
        )
        .await;
        let user_content = match &request.context {
            Some(context) => format!("{}\n\n{}", request.task, context),
            None => request.task.clone(),
        };
        self.trace(&delegation, 1, MessageRole::User, user_content, None)
            .await;

        let completion_request = CompletionRequest {
            system: profile.system_prompt.clone(),
            user: request.task.clone(),
            context: request.context.clone(),
            tools: profile.allowed_tools.clone(),
            model,
            max_tokens: token_budget,
        };

        let invocation = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.invoke(completion_request, cancel),
        )
        .await;

        match invocation {
            Ok(InvokeOutcome::Cancelled) => {
                delegation.error = Some("delegation cancelled".to_string());
                delegation.finish(DelegationStatus::Cancelled);
                self.repo.update(&delegation).await?;
                self.audit
                    .record(
                        AuditDraft::info(
                            AuditEvent::DelegationFailed,
                            format!("delegation to '{}' cancelled", profile.name),
                        )
                        .with_task(delegation.id.to_string()),
                    )
                    .await?;
            }
            Ok(InvokeOutcome::Done(Ok(response))) => {
                // Suppress tool calls outside the profile allow-list
                let (allowed, suppressed): (Vec<ToolCall>, Vec<ToolCall>) = response
                    .tool_calls
                    .into_iter()
                    .partition(|call| profile.allows_tool(&call.tool));
                if !suppressed.is_empty() {
                    tracing::warn!(
                        delegation_id = %delegation.id,
                        profile = %profile.name,
                        suppressed = suppressed.len(),
                        "suppressed disallowed tool calls"
                    );
                }

                let trace_calls = serde_json::json!({
                    "allowed": allowed,
                    "suppressed": suppressed,
                });
                self.trace(
                    &delegation,
                    2,
                    MessageRole::Assistant,
                    response.text.clone(),
                    Some((trace_calls, response.tokens.completion)),
                )
                .await;

                delegation.tokens = response.tokens;
                delegation.result = Some(response.text);
                delegation.finish(DelegationStatus::Completed);
                self.repo.update(&delegation).await?;
                self.audit
                    .record(
                        AuditDraft::info(
                            AuditEvent::DelegationCompleted,
                            format!(
                                "delegation to '{}' completed ({} tokens)",
                                profile.name,
                                delegation.tokens.total()
                            ),
                        )
                        .with_task(delegation.id.to_string()),
                    )
                    .await?;
            }
            Ok(InvokeOutcome::Done(Err(err))) => {
                delegation.error = Some(err.to_string());
                delegation.finish(DelegationStatus::Failed);
                self.repo.update(&delegation).await?;
                self.audit
                    .record(
                        AuditDraft::error(
                            AuditEvent::DelegationFailed,
                            format!("delegation to '{}' failed: {err}", profile.name),
                        )
                        .with_task(delegation.id.to_string()),
                    )
                    .await?;
            }
            Err(_elapsed) => {
                delegation.error = Some(format!("delegation exceeded {timeout_ms}ms"));
                delegation.finish(DelegationStatus::Timeout);
                self.repo.update(&delegation).await?;
                self.audit
                    .record(
                        AuditDraft::warn(
                            AuditEvent::DelegationFailed,
                            format!("delegation to '{}' timed out", profile.name),
                        )
                        .with_task(delegation.id.to_string()),
                    )
                    .await?;
            }
        }

        Ok(DelegationOutcome {
            delegation_id: delegation.id,
            status: delegation.status,
            result: delegation.result.clone(),
            error: delegation.error.clone(),
            tokens: delegation.tokens,
        })
    }

    /// The full message trace of a delegation, for audit views.
    pub async fn messages(&self, delegation_id: Uuid) -> DomainResult<Vec<DelegationMessage>> {
        self.repo.list_messages(delegation_id).await
    }

    async fn invoke(
        &self,
        request: CompletionRequest,
        cancel: Option<CancellationToken>,
    ) -> InvokeOutcome {
        match cancel {
            Some(token) => {
                tokio::select! {
                    response = self.llm.complete(request) => InvokeOutcome::Done(response),
                    () = token.cancelled() => InvokeOutcome::Cancelled,
                }
            }
            None => InvokeOutcome::Done(self.llm.complete(request).await),
        }
    }

    /// Walk up to the root of a delegation tree; the parent itself when
    /// it has no ancestors.
    async fn find_root(&self, parent: &Delegation) -> DomainResult<Option<Delegation>> {
        let mut current = parent.clone();
        while let Some(grandparent_id) = current.parent_id {
            match self.repo.get(grandparent_id).await? {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(Some(current))
    }

    async fn trace(
        &self,
        delegation: &Delegation,
        seq: u32,
        role: MessageRole,
        content: String,
        calls_and_tokens: Option<(serde_json::Value, u64)>,
    ) {
        let mut message = DelegationMessage::new(delegation.id, seq, role, content);
        if let Some((calls, tokens)) = calls_and_tokens {
            message = message.with_tool_calls(calls).with_token_count(tokens);
        }
        if let Err(err) = self.repo.append_message(&message).await {
            tracing::error!(
                delegation_id = %delegation.id,
                error = %err,
                "failed to persist delegation trace message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentProfile;
    use crate::domain::ports::{AuditStore, CompletionResponse};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::RwLock;

    struct MemProfiles {
        by_name: RwLock<HashMap<String, AgentProfile>>,
    }

    impl MemProfiles {
        fn with(profiles: Vec<AgentProfile>) -> Arc<Self> {
            Arc::new(Self {
                by_name: RwLock::new(
                    profiles.into_iter().map(|p| (p.name.clone(), p)).collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl ProfileRepository for MemProfiles {
        async fn create(&self, profile: &AgentProfile) -> DomainResult<()> {
            self.by_name
                .write()
                .await
                .insert(profile.name.clone(), profile.clone());
            Ok(())
        }
        async fn get(&self, id: Uuid) -> DomainResult<Option<AgentProfile>> {
            Ok(self
                .by_name
                .read()
                .await
                .values()
                .find(|p| p.id == id)
                .cloned())
        }
        async fn get_by_name(&self, name: &str) -> DomainResult<Option<AgentProfile>> {
            Ok(self.by_name.read().await.get(name).cloned())
        }
        async fn list(&self) -> DomainResult<Vec<AgentProfile>> {
            Ok(self.by_name.read().await.values().cloned().collect())
        }
        async fn update(&self, profile: &AgentProfile) -> DomainResult<()> {
            self.create(profile).await
        }
        async fn delete(&self, _id: Uuid) -> DomainResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemDelegations {
        rows: RwLock<HashMap<Uuid, Delegation>>,
        messages: RwLock<Vec<DelegationMessage>>,
    }

    #[async_trait]
    impl DelegationRepository for MemDelegations {
        async fn create(&self, delegation: &Delegation) -> DomainResult<()> {
            self.rows
                .write()
                .await
                .insert(delegation.id, delegation.clone());
            Ok(())
        }
        async fn get(&self, id: Uuid) -> DomainResult<Option<Delegation>> {
            Ok(self.rows.read().await.get(&id).cloned())
        }
        async fn update(&self, delegation: &Delegation) -> DomainResult<()> {
            self.create(delegation).await
        }
        async fn list_children(&self, parent_id: Uuid) -> DomainResult<Vec<Delegation>> {
            Ok(self
                .rows
                .read()
                .await
                .values()
                .filter(|d| d.parent_id == Some(parent_id))
                .cloned()
                .collect())
        }
        async fn tree_token_usage(&self, root_id: Uuid) -> DomainResult<TokenUsage> {
            let rows = self.rows.read().await;
            let mut usage = TokenUsage::default();
            let mut frontier = vec![root_id];
            while let Some(id) = frontier.pop() {
                if let Some(d) = rows.get(&id) {
                    usage.add(d.tokens);
                }
                frontier.extend(
                    rows.values()
                        .filter(|d| d.parent_id == Some(id))
                        .map(|d| d.id),
                );
            }
            Ok(usage)
        }
        async fn append_message(&self, message: &DelegationMessage) -> DomainResult<()> {
            self.messages.write().await.push(message.clone());
            Ok(())
        }
        async fn list_messages(
            &self,
            delegation_id: Uuid,
        ) -> DomainResult<Vec<DelegationMessage>> {
            let mut out: Vec<DelegationMessage> = self
                .messages
                .read()
                .await
                .iter()
                .filter(|m| m.delegation_id == delegation_id)
                .cloned()
                .collect();
            out.sort_by_key(|m| m.seq);
            Ok(out)
        }
    }

    struct ScriptedLlm {
        calls: AtomicU32,
        response: CompletionResponse,
    }

    impl ScriptedLlm {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                response: CompletionResponse {
                    text: text.to_string(),
                    tokens: TokenUsage {
                        prompt: 100,
                        completion: 50,
                        cached: 0,
                    },
                    tool_calls: vec![
                        ToolCall {
                            tool: "read_file".into(),
                            arguments: serde_json::json!({"path": "a.txt"}),
                        },
                        ToolCall {
                            tool: "shell".into(),
                            arguments: serde_json::json!({"cmd": "rm -rf /"}),
                        },
                    ],
                },
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: CompletionRequest) -> DomainResult<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct NullAudit;

    #[async_trait]
    impl AuditStore for NullAudit {
        async fn append(&self, _entry: &crate::domain::models::AuditEntry) -> DomainResult<()> {
            Ok(())
        }
        async fn last(&self) -> DomainResult<Option<crate::domain::models::AuditEntry>> {
            Ok(None)
        }
        async fn query(
            &self,
            _filter: crate::domain::models::AuditFilter,
        ) -> DomainResult<Vec<crate::domain::models::AuditEntry>> {
            Ok(Vec::new())
        }
        async fn range(
            &self,
            _from: u64,
            _to: u64,
        ) -> DomainResult<Vec<crate::domain::models::AuditEntry>> {
            Ok(Vec::new())
        }
        async fn delete_before(&self, _seq: u64) -> DomainResult<u64> {
            Ok(0)
        }
        async fn first_seq(&self) -> DomainResult<Option<u64>> {
            Ok(None)
        }
        async fn stats(&self) -> DomainResult<crate::domain::models::AuditStats> {
            Ok(crate::domain::models::AuditStats::default())
        }
    }

    async fn service(llm: Arc<ScriptedLlm>) -> (DelegationService, Arc<MemDelegations>) {
        let profile = AgentProfile::new("researcher", "You research.", "small-model", 50_000)
            .with_tools(vec!["read_file".into()]);
        let profiles = MemProfiles::with(vec![profile]);
        let repo = Arc::new(MemDelegations::default());
        let audit = Arc::new(
            AuditChain::open(Arc::new(NullAudit), vec![9u8; 32])
                .await
                .unwrap(),
        );
        (
            DelegationService::new(
                profiles,
                repo.clone(),
                llm,
                audit,
                DelegationConfig::default(),
            ),
            repo,
        )
    }

    #[tokio::test]
    async fn test_delegate_happy_path() {
        let (service, repo) = service(ScriptedLlm::answering("findings")).await;
        let outcome = service
            .delegate(DelegationRequest::new("researcher", "research this"), None)
            .await
            .unwrap();

        assert_eq!(outcome.status, DelegationStatus::Completed);
        assert_eq!(outcome.result.as_deref(), Some("findings"));
        assert_eq!(outcome.tokens.total(), 150);

        let row = repo.get(outcome.delegation_id).await.unwrap().unwrap();
        assert_eq!(row.depth, 0);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_profile_rejected() {
        let (service, _) = service(ScriptedLlm::answering("x")).await;
        let err = service
            .delegate(DelegationRequest::new("ghost", "task"), None)
            .await;
        assert!(matches!(err, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_budget_clamped_to_profile_ceiling() {
        let (service, repo) = service(ScriptedLlm::answering("x")).await;
        let outcome = service
            .delegate(
                DelegationRequest::new("researcher", "task").with_budget(10_000_000),
                None,
            )
            .await
            .unwrap();
        let row = repo.get(outcome.delegation_id).await.unwrap().unwrap();
        assert_eq!(row.token_budget, 50_000);
    }

    #[tokio::test]
    async fn test_depth_enforced_through_parents() {
        let (service, repo) = service(ScriptedLlm::answering("x")).await;
        let root = service
            .delegate(DelegationRequest::new("researcher", "level 0"), None)
            .await
            .unwrap();

        let mut parent = root.delegation_id;
        for level in 1..=3 {
            let child = service
                .delegate(
                    DelegationRequest::new("researcher", format!("level {level}"))
                        .with_parent(parent),
                    None,
                )
                .await
                .unwrap();
            parent = child.delegation_id;
        }

        // Depth 4 exceeds max_depth 3
        let err = service
            .delegate(
                DelegationRequest::new("researcher", "too deep").with_parent(parent),
                None,
            )
            .await;
        assert!(matches!(err, Err(DomainError::Validation(_))));

        let deepest = repo.get(parent).await.unwrap().unwrap();
        assert_eq!(deepest.depth, 3);
    }

    #[tokio::test]
    async fn test_disallowed_tools_suppressed_in_trace() {
        let (service, _repo) = service(ScriptedLlm::answering("done")).await;
        let outcome = service
            .delegate(DelegationRequest::new("researcher", "task"), None)
            .await
            .unwrap();

        let messages = service.messages(outcome.delegation_id).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1].role, MessageRole::User);
        assert_eq!(messages[2].role, MessageRole::Assistant);

        let calls = messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls["allowed"].as_array().unwrap().len(), 1);
        assert_eq!(calls["suppressed"].as_array().unwrap().len(), 1);
        assert_eq!(calls["suppressed"][0]["tool"], "shell");
    }
}
