//! Swarm manager: sequential / parallel / dynamic strategies over
//! delegations, with budget division, partial-failure tolerance, and
//! advisory cost-aware model routing.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuditDraft, AuditEvent, SwarmConfig, SwarmMember, SwarmMemberStatus, SwarmRole, SwarmRun,
    SwarmRunStatus, SwarmStrategy, SwarmTemplate, TokenUsage,
};
use crate::domain::ports::{
    DelegationRepository, ModelRouter, RouteRequest, SwarmRepository,
};
use crate::services::audit_chain::AuditChain;
use crate::services::delegation::{DelegationRequest, DelegationService};

/// Model-routing advice below this confidence is ignored.
const ROUTING_CONFIDENCE_FLOOR: f64 = 0.5;

/// Launch request for one swarm run.
#[derive(Debug, Clone)]
pub struct ExecuteSwarm {
    pub template_id: Uuid,
    pub task: String,
    pub context: Option<String>,
    pub token_budget: Option<u64>,
    pub initiator: String,
}

/// A run plus its ordered members.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SwarmRunView {
    pub run: SwarmRun,
    pub members: Vec<SwarmMember>,
}

/// Pre-execution cost estimate; produced without side effects.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SwarmCostEstimate {
    pub template_id: Uuid,
    pub total_estimated_cost_usd: f64,
    pub per_role: Vec<RoleCostEstimate>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RoleCostEstimate {
    pub role: String,
    pub profile: String,
    pub selected_model: Option<String>,
    pub estimated_cost_usd: f64,
    pub confidence: f64,
}

/// Coordinates swarm runs over the delegation service.
pub struct SwarmManager {
    repo: Arc<dyn SwarmRepository>,
    delegation_repo: Arc<dyn DelegationRepository>,
    delegations: Arc<DelegationService>,
    router: Option<Arc<dyn ModelRouter>>,
    audit: Arc<AuditChain>,
    config: SwarmConfig,
    /// Cancel tokens of in-flight runs.
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl SwarmManager {
    pub fn new(
        repo: Arc<dyn SwarmRepository>,
        delegation_repo: Arc<dyn DelegationRepository>,
        delegations: Arc<DelegationService>,
        router: Option<Arc<dyn ModelRouter>>,
        audit: Arc<AuditChain>,
        config: SwarmConfig,
    ) -> Self {
        Self {
            repo,
            delegation_repo,
            delegations,
            router,
            audit,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a template to completion and return the run with members.
    pub async fn execute_swarm(&self, request: ExecuteSwarm) -> DomainResult<SwarmRunView> {
        let template = self
            .repo
            .get_template(request.template_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found("swarm template", request.template_id.to_string())
            })?;
        template.validate().map_err(DomainError::Validation)?;

        let budget = request
            .token_budget
            .unwrap_or(self.config.default_token_budget);
        let mut run = SwarmRun::new(&template, request.task, budget, request.initiator);
        if let Some(context) = request.context {
            run = run.with_context(context);
        }
        self.repo.create_run(&run).await?;

        run.status = SwarmRunStatus::Running;
        run.started_at = Some(chrono::Utc::now());
        self.repo.update_run(&run).await?;
        self.audit
            .record(
                AuditDraft::info(
                    AuditEvent::SwarmStarted,
                    format!("swarm '{}' started ({})", template.name, run.strategy.as_str()),
                )
                .with_user(&run.initiator)
                .with_task(run.id.to_string()),
            )
            .await?;

        let cancel = CancellationToken::new();
        self.active.lock().await.insert(run.id, cancel.clone());

        let dispatched = match run.strategy {
            SwarmStrategy::Sequential => self.run_sequential(&run, &template, &cancel).await,
            SwarmStrategy::Parallel => self.run_parallel(&run, &template, &cancel).await,
            SwarmStrategy::Dynamic => self.run_dynamic(&run, &template, &cancel).await,
        };
        self.active.lock().await.remove(&run.id);

        // A concurrent cancel_swarm owns the terminal state
        if let Some(current) = self.repo.get_run(run.id).await? {
            if current.status == SwarmRunStatus::Cancelled {
                let members = self.repo.list_members(run.id).await?;
                return Ok(SwarmRunView {
                    run: current,
                    members,
                });
            }
        }

        let totals = self.collect_token_totals(run.id).await?;
        run.tokens_in = totals.prompt;
        run.tokens_out = totals.completion;
        run.completed_at = Some(chrono::Utc::now());

        match dispatched {
            Ok(result) => {
                run.status = SwarmRunStatus::Completed;
                run.result = result;
                self.repo.update_run(&run).await?;
                self.audit
                    .record(
                        AuditDraft::info(
                            AuditEvent::SwarmCompleted,
                            format!(
                                "swarm '{}' completed ({} tokens)",
                                template.name,
                                totals.total()
                            ),
                        )
                        .with_user(&run.initiator)
                        .with_task(run.id.to_string()),
                    )
                    .await?;
            }
            Err(err) => {
                run.status = SwarmRunStatus::Failed;
                run.error = Some(err.to_string());
                self.repo.update_run(&run).await?;
                self.audit
                    .record(
                        AuditDraft::error(
                            AuditEvent::SwarmFailed,
                            format!("swarm '{}' failed: {err}", template.name),
                        )
                        .with_user(&run.initiator)
                        .with_task(run.id.to_string()),
                    )
                    .await?;
            }
        }

        let members = self.repo.list_members(run.id).await?;
        Ok(SwarmRunView { run, members })
    }

    /// Roles run in declared order; a failure is recorded into the member
    /// and carried forward in context so downstream roles see it.
    async fn run_sequential(
        &self,
        run: &SwarmRun,
        template: &SwarmTemplate,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<String>> {
        let per_budget = run.token_budget / template.roles.len() as u64;
        let mut prior_results: Vec<String> = Vec::new();
        let mut last_result: Option<String> = None;

        for (index, role) in template.roles.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let mut member = SwarmMember::new(
                run.id,
                u32::try_from(index).unwrap_or(u32::MAX),
                role.role.clone(),
                role.profile_name.clone(),
            );
            member.status = SwarmMemberStatus::Running;
            member.started_at = Some(chrono::Utc::now());
            self.repo.create_member(&member).await?;

            let context = compose_context(run.context.as_deref(), &prior_results);
            let model_override = self.route(&run.task, context.as_deref(), per_budget).await;

            let mut delegation_request = DelegationRequest::new(&role.profile_name, &run.task)
                .with_budget(per_budget);
            if let Some(context) = &context {
                delegation_request = delegation_request.with_context(context.clone());
            }
            if let Some(model) = model_override {
                delegation_request = delegation_request.with_model_override(model);
            }

            match self
                .delegations
                .delegate(delegation_request, Some(cancel.child_token()))
                .await
            {
                Ok(outcome) => {
                    member.delegation_id = Some(outcome.delegation_id);
                    if outcome.status == crate::domain::models::DelegationStatus::Completed {
                        member.status = SwarmMemberStatus::Completed;
                        member.result = outcome.result.clone();
                        if let Some(result) = outcome.result {
                            prior_results.push(result.clone());
                            last_result = Some(result);
                        }
                    } else {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| "delegation failed".to_string());
                        member.status = SwarmMemberStatus::Failed;
                        member.result = Some(format!("Error: {error}"));
                        // Downstream roles see the failure in context
                        prior_results.push(format!("Error: {error}"));
                    }
                }
                Err(err) => {
                    member.status = SwarmMemberStatus::Failed;
                    member.result = Some(format!("Error: {err}"));
                    prior_results.push(format!("Error: {err}"));
                }
            }

            member.completed_at = Some(chrono::Utc::now());
            self.repo.update_member(&member).await?;
        }

        Ok(last_result)
    }

    /// All roles run concurrently with isolated failures; an optional
    /// coordinator synthesises the joined results.
    async fn run_parallel(
        &self,
        run: &SwarmRun,
        template: &SwarmTemplate,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<String>> {
        let coordinator_slots = u64::from(template.coordinator_profile.is_some());
        let per_budget = run.token_budget / (template.roles.len() as u64 + coordinator_slots);

        // All member rows exist before anything runs
        let mut members = Vec::with_capacity(template.roles.len());
        for (index, role) in template.roles.iter().enumerate() {
            let mut member = SwarmMember::new(
                run.id,
                u32::try_from(index).unwrap_or(u32::MAX),
                role.role.clone(),
                role.profile_name.clone(),
            );
            member.status = SwarmMemberStatus::Running;
            member.started_at = Some(chrono::Utc::now());
            self.repo.create_member(&member).await?;
            members.push(member);
        }

        let executions = template.roles.iter().map(|role| {
            let delegation_request = DelegationRequest::new(&role.profile_name, &run.task)
                .with_budget(per_budget);
            let delegation_request = match &run.context {
                Some(context) => delegation_request.with_context(context.clone()),
                None => delegation_request,
            };
            self.delegations
                .delegate(delegation_request, Some(cancel.child_token()))
        });
        let outcomes = join_all(executions).await;

        let mut joined_results = Vec::with_capacity(members.len());
        for (member, outcome) in members.iter_mut().zip(outcomes) {
            match outcome {
                Ok(outcome) => {
                    member.delegation_id = Some(outcome.delegation_id);
                    if outcome.status == crate::domain::models::DelegationStatus::Completed {
                        member.status = SwarmMemberStatus::Completed;
                        member.result = outcome.result;
                    } else {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| "delegation failed".to_string());
                        member.status = SwarmMemberStatus::Failed;
                        member.result = Some(format!("Error: {error}"));
                    }
                }
                Err(err) => {
                    member.status = SwarmMemberStatus::Failed;
                    member.result = Some(format!("Error: {err}"));
                }
            }
            member.completed_at = Some(chrono::Utc::now());
            self.repo.update_member(member).await?;
            joined_results.push(member.result.clone().unwrap_or_default());
        }

        let Some(coordinator_profile) = &template.coordinator_profile else {
            // Stable order by seq_order, which `members` already is
            return Ok(Some(joined_results.join("\n\n")));
        };

        let mut coordinator = SwarmMember::new(
            run.id,
            u32::try_from(template.roles.len()).unwrap_or(u32::MAX),
            "coordinator",
            coordinator_profile.clone(),
        );
        coordinator.status = SwarmMemberStatus::Running;
        coordinator.started_at = Some(chrono::Utc::now());
        self.repo.create_member(&coordinator).await?;

        let synthesis_context = joined_results.join("\n\n");
        let outcome = self
            .delegations
            .delegate(
                DelegationRequest::new(coordinator_profile, &run.task)
                    .with_context(synthesis_context)
                    .with_budget(per_budget),
                Some(cancel.child_token()),
            )
            .await;

        let result = match outcome {
            Ok(outcome)
                if outcome.status == crate::domain::models::DelegationStatus::Completed =>
            {
                coordinator.delegation_id = Some(outcome.delegation_id);
                coordinator.status = SwarmMemberStatus::Completed;
                coordinator.result = outcome.result.clone();
                outcome.result
            }
            Ok(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "delegation failed".to_string());
                coordinator.delegation_id = Some(outcome.delegation_id);
                coordinator.status = SwarmMemberStatus::Failed;
                coordinator.result = Some(format!("Error: {error}"));
                coordinator.result.clone()
            }
            Err(err) => {
                coordinator.status = SwarmMemberStatus::Failed;
                coordinator.result = Some(format!("Error: {err}"));
                coordinator.result.clone()
            }
        };
        coordinator.completed_at = Some(chrono::Utc::now());
        self.repo.update_member(&coordinator).await?;

        Ok(result)
    }

    /// A single coordinator drives the whole run with the full budget; it
    /// spawns its own child delegations internally.
    async fn run_dynamic(
        &self,
        run: &SwarmRun,
        template: &SwarmTemplate,
        cancel: &CancellationToken,
    ) -> DomainResult<Option<String>> {
        let coordinator_profile = template
            .coordinator_profile
            .clone()
            .unwrap_or_else(|| self.config.default_coordinator_profile.clone());

        let mut member = SwarmMember::new(run.id, 0, "coordinator", coordinator_profile.clone());
        member.status = SwarmMemberStatus::Running;
        member.started_at = Some(chrono::Utc::now());
        self.repo.create_member(&member).await?;

        let mut delegation_request = DelegationRequest::new(&coordinator_profile, &run.task)
            .with_budget(run.token_budget);
        if let Some(context) = &run.context {
            delegation_request = delegation_request.with_context(context.clone());
        }

        let result = match self
            .delegations
            .delegate(delegation_request, Some(cancel.child_token()))
            .await
        {
            Ok(outcome)
                if outcome.status == crate::domain::models::DelegationStatus::Completed =>
            {
                member.delegation_id = Some(outcome.delegation_id);
                member.status = SwarmMemberStatus::Completed;
                member.result = outcome.result.clone();
                outcome.result
            }
            Ok(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "delegation failed".to_string());
                member.delegation_id = Some(outcome.delegation_id);
                member.status = SwarmMemberStatus::Failed;
                member.result = Some(format!("Error: {error}"));
                self.finish_member(&mut member).await?;
                return Err(DomainError::Execution(error));
            }
            Err(err) => {
                member.status = SwarmMemberStatus::Failed;
                member.result = Some(format!("Error: {err}"));
                self.finish_member(&mut member).await?;
                return Err(err);
            }
        };

        self.finish_member(&mut member).await?;
        Ok(result)
    }

    async fn finish_member(&self, member: &mut SwarmMember) -> DomainResult<()> {
        member.completed_at = Some(chrono::Utc::now());
        self.repo.update_member(member).await
    }

    /// Aggregate prompt/completion tokens from member delegations.
    async fn collect_token_totals(&self, run_id: Uuid) -> DomainResult<TokenUsage> {
        let members = self.repo.list_members(run_id).await?;
        let mut totals = TokenUsage::default();
        for member in members {
            let Some(delegation_id) = member.delegation_id else {
                continue;
            };
            if let Some(delegation) = self.delegation_repo.get(delegation_id).await? {
                totals.add(delegation.tokens);
            }
        }
        Ok(totals)
    }

    /// Cancel a run. Legal only from pending/running; running members are
    /// flipped to cancelled best-effort and in-flight delegations observe
    /// the fired token.
    pub async fn cancel_swarm(&self, run_id: Uuid) -> DomainResult<SwarmRun> {
        let mut run = self
            .repo
            .get_run(run_id)
            .await?
            .ok_or_else(|| DomainError::not_found("swarm run", run_id.to_string()))?;

        if !run.status.cancellable() {
            return Err(DomainError::Conflict(format!(
                "swarm run in status '{}' cannot be cancelled",
                run.status.as_str()
            )));
        }

        run.status = SwarmRunStatus::Cancelled;
        run.completed_at = Some(chrono::Utc::now());
        self.repo.update_run(&run).await?;

        if let Some(token) = self.active.lock().await.remove(&run_id) {
            token.cancel();
        }

        for mut member in self.repo.list_members(run_id).await? {
            if member.status == SwarmMemberStatus::Running
                || member.status == SwarmMemberStatus::Pending
            {
                member.status = SwarmMemberStatus::Cancelled;
                member.completed_at = Some(chrono::Utc::now());
                if let Err(err) = self.repo.update_member(&member).await {
                    tracing::warn!(
                        run_id = %run_id,
                        member = member.seq_order,
                        error = %err,
                        "best-effort member cancellation failed"
                    );
                }
            }
        }

        self.audit
            .record(
                AuditDraft::info(
                    AuditEvent::SwarmCancelled,
                    format!("swarm run {run_id} cancelled"),
                )
                .with_task(run_id.to_string()),
            )
            .await?;

        Ok(run)
    }

    /// A run with its members.
    pub async fn get_run(&self, run_id: Uuid) -> DomainResult<Option<SwarmRunView>> {
        let Some(run) = self.repo.get_run(run_id).await? else {
            return Ok(None);
        };
        let members = self.repo.list_members(run_id).await?;
        Ok(Some(SwarmRunView { run, members }))
    }

    pub async fn list_runs(&self, limit: u32, offset: u32) -> DomainResult<Vec<SwarmRun>> {
        self.repo.list_runs(limit, offset).await
    }

    pub async fn list_templates(&self) -> DomainResult<Vec<SwarmTemplate>> {
        self.repo.list_templates()
            .await
    }

    pub async fn create_template(&self, template: &SwarmTemplate) -> DomainResult<()> {
        template.validate().map_err(DomainError::Validation)?;
        self.repo.create_template(template).await
    }

    /// Pre-execution cost projection, free of side effects.
    pub async fn estimate_swarm_cost(
        &self,
        template_id: Uuid,
        task: &str,
        token_budget: Option<u64>,
        context: Option<&str>,
    ) -> DomainResult<SwarmCostEstimate> {
        let template = self
            .repo
            .get_template(template_id)
            .await?
            .ok_or_else(|| DomainError::not_found("swarm template", template_id.to_string()))?;

        let budget = token_budget.unwrap_or(self.config.default_token_budget);
        let roles: Vec<SwarmRole> = match template.strategy {
            SwarmStrategy::Dynamic => vec![SwarmRole::new(
                "coordinator",
                template
                    .coordinator_profile
                    .clone()
                    .unwrap_or_else(|| self.config.default_coordinator_profile.clone()),
            )],
            _ => template.roles.clone(),
        };
        let per_budget = budget / roles.len().max(1) as u64;

        let mut per_role = Vec::with_capacity(roles.len());
        let mut total = 0.0;
        for role in &roles {
            let decision = match &self.router {
                Some(router) => router
                    .route(RouteRequest {
                        task: task.to_string(),
                        context: context.map(str::to_string),
                        allowed_models: Vec::new(),
                        token_budget: per_budget,
                    })
                    .await
                    .ok(),
                None => None,
            };
            let (selected_model, cost, confidence) = match decision {
                Some(d) => (Some(d.selected_model), d.estimated_cost_usd, d.confidence),
                None => (None, 0.0, 0.0),
            };
            total += cost;
            per_role.push(RoleCostEstimate {
                role: role.role.clone(),
                profile: role.profile_name.clone(),
                selected_model,
                estimated_cost_usd: cost,
                confidence,
            });
        }

        Ok(SwarmCostEstimate {
            template_id,
            total_estimated_cost_usd: total,
            per_role,
        })
    }

    /// Ask the router for a model override; advisory only.
    async fn route(
        &self,
        task: &str,
        context: Option<&str>,
        token_budget: u64,
    ) -> Option<String> {
        let router = self.router.as_ref()?;
        let decision = router
            .route(RouteRequest {
                task: task.to_string(),
                context: context.map(str::to_string),
                allowed_models: Vec::new(),
                token_budget,
            })
            .await
            .ok()?;
        (decision.confidence >= ROUTING_CONFIDENCE_FLOOR).then_some(decision.selected_model)
    }
}

fn compose_context(original: Option<&str>, prior_results: &[String]) -> Option<String> {
    match (original, prior_results.is_empty()) {
        (None, true) => None,
        (Some(original), true) => Some(original.to_string()),
        (None, false) => Some(prior_results.join("\n\n")),
        (Some(original), false) => {
            Some(format!("{original}\n\n{}", prior_results.join("\n\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_context_concatenates_prior_results() {
        assert_eq!(compose_context(None, &[]), None);
        assert_eq!(
            compose_context(Some("base"), &[]).as_deref(),
            Some("base")
        );
        let prior = vec!["first".to_string(), "Error: boom".to_string()];
        let composed = compose_context(Some("base"), &prior).unwrap();
        assert!(composed.starts_with("base"));
        assert!(composed.contains("first"));
        assert!(composed.contains("Error: boom"));
    }
}
