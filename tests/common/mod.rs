//! Shared test fixtures: in-memory database, scripted LLM, and a fully
//! wired executor/swarm environment.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use warden::adapters::sqlite::{
    DatabaseConnection, SqliteAuditStore, SqliteDelegationRepository, SqliteProfileRepository,
    SqliteSwarmRepository, SqliteTaskRepository,
};
use warden::domain::errors::{DomainError, DomainResult};
use warden::domain::models::{
    AgentProfile, ExecutorConfig, RateKeyType, RateOnExceed, RateRuleConfig, SwarmConfig,
    TokenUsage, ValidationConfig,
};
use warden::domain::ports::{
    CompletionRequest, CompletionResponse, LlmClient, ProfileRepository,
};
use warden::services::{
    AuditChain, DelegationConfig, DelegationService, InputValidator, RateLimiterService,
    RbacService, SwarmManager, TaskExecutor,
};

/// 32-byte signing key used across tests.
pub fn signing_key() -> Vec<u8> {
    b"test-signing-key-0123456789abcdef".to_vec()
}

/// LLM stub: answers deterministically, records every request, and can be
/// told to fail for one profile (matched on the system prompt).
pub struct ScriptedLlm {
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub fail_if_system_contains: Option<String>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail_if_system_contains: None,
        })
    }

    pub fn failing_for(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail_if_system_contains: Some(marker.to_string()),
        })
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse> {
        let call_index = {
            let mut requests = self.requests.lock().await;
            requests.push(request.clone());
            requests.len()
        };

        if let Some(marker) = &self.fail_if_system_contains {
            if request.system.contains(marker) {
                return Err(DomainError::Execution(format!(
                    "scripted failure for '{marker}'"
                )));
            }
        }

        // First word of the system prompt identifies the profile
        let persona = request
            .system
            .split_whitespace()
            .next()
            .unwrap_or("anon")
            .to_lowercase();
        Ok(CompletionResponse {
            text: format!("{persona} result #{call_index}"),
            tokens: TokenUsage {
                prompt: 120,
                completion: 40,
                cached: 0,
            },
            tool_calls: Vec::new(),
        })
    }
}

/// Everything a swarm/executor test needs, over one in-memory SQLite.
pub struct TestEnv {
    pub db: DatabaseConnection,
    pub audit: Arc<AuditChain>,
    pub rbac: Arc<RbacService>,
    pub limiter: Arc<RateLimiterService>,
    pub task_repo: Arc<SqliteTaskRepository>,
    pub executor: Arc<TaskExecutor>,
    pub swarm_repo: Arc<SqliteSwarmRepository>,
    pub delegation_repo: Arc<SqliteDelegationRepository>,
    pub profile_repo: Arc<SqliteProfileRepository>,
    pub delegations: Arc<DelegationService>,
    pub swarms: Arc<SwarmManager>,
    pub llm: Arc<ScriptedLlm>,
}

impl TestEnv {
    /// A second manager over the same repositories with a model router
    /// attached.
    pub fn swarms_with_router(
        &self,
        router: Arc<dyn warden::domain::ports::ModelRouter>,
    ) -> Arc<SwarmManager> {
        Arc::new(SwarmManager::new(
            self.swarm_repo.clone(),
            self.delegation_repo.clone(),
            self.delegations.clone(),
            Some(router),
            Arc::clone(&self.audit),
            warden::domain::models::SwarmConfig::default(),
        ))
    }
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_llm(ScriptedLlm::new()).await
    }

    pub async fn with_llm(llm: Arc<ScriptedLlm>) -> Self {
        Self::build(llm, executor_config(), vec![generous_rule()]).await
    }

    pub async fn with_executor_config(config: ExecutorConfig) -> Self {
        Self::build(ScriptedLlm::new(), config, vec![generous_rule()]).await
    }

    pub async fn with_rate_rules(rules: Vec<RateRuleConfig>) -> Self {
        Self::build(ScriptedLlm::new(), executor_config(), rules).await
    }

    async fn build(
        llm: Arc<ScriptedLlm>,
        executor_config: ExecutorConfig,
        rules: Vec<RateRuleConfig>,
    ) -> Self {
        let db = DatabaseConnection::in_memory()
            .await
            .expect("in-memory database");
        let pool = db.pool();

        let audit_store = Arc::new(SqliteAuditStore::new(pool.clone()));
        let audit = Arc::new(
            AuditChain::open(audit_store, signing_key())
                .await
                .expect("audit chain"),
        );
        let rbac = RbacService::with_default_roles().await;
        let validator = Arc::new(InputValidator::new(ValidationConfig::default()));
        let limiter = Arc::new(RateLimiterService::new(rules));

        let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let executor = TaskExecutor::new(
            executor_config,
            validator,
            Arc::clone(&limiter),
            Arc::clone(&rbac),
            Arc::clone(&audit),
            task_repo.clone(),
        );

        let swarm_repo = Arc::new(SqliteSwarmRepository::new(pool.clone()));
        let delegation_repo = Arc::new(SqliteDelegationRepository::new(pool.clone()));
        let profile_repo = Arc::new(SqliteProfileRepository::new(pool.clone()));

        seed_profiles(profile_repo.as_ref()).await;

        let delegations = Arc::new(DelegationService::new(
            profile_repo.clone(),
            delegation_repo.clone(),
            llm.clone(),
            Arc::clone(&audit),
            DelegationConfig::default(),
        ));
        let swarms = Arc::new(SwarmManager::new(
            swarm_repo.clone(),
            delegation_repo.clone(),
            delegations.clone(),
            None,
            Arc::clone(&audit),
            SwarmConfig::default(),
        ));

        Self {
            db,
            audit,
            rbac,
            limiter,
            task_repo,
            executor,
            swarm_repo,
            delegation_repo,
            profile_repo,
            delegations,
            swarms,
            llm,
        }
    }
}

fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent: 4,
        default_timeout_ms: 10_000,
        max_timeout_ms: 30_000,
        ..ExecutorConfig::default()
    }
}

fn generous_rule() -> RateRuleConfig {
    RateRuleConfig {
        name: "task_creation".into(),
        window_ms: 60_000,
        max_requests: 1_000,
        key_type: RateKeyType::User,
        on_exceed: RateOnExceed::Reject,
    }
}

async fn seed_profiles(repo: &dyn ProfileRepository) {
    for (name, prompt) in [
        ("researcher", "Researcher persona. Gather facts."),
        ("coder", "Coder persona. Write the implementation."),
        ("reviewer", "Reviewer persona. Find the defects."),
        ("synthesizer", "Synthesizer persona. Merge the drafts."),
        ("critic", "Critic persona. Attack the weakest point."),
    ] {
        let profile = AgentProfile::new(name, prompt, "test-model", 1_000_000);
        repo.create(&profile).await.expect("seed profile");
    }
}
