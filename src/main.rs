//! Warden CLI entry point.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use warden::adapters::http::{AppState, Gateway, StaticTokenAuth, WsHub};
use warden::adapters::integrations::WebhookIntegration;
use warden::adapters::sqlite::{
    DatabaseConnection, SqliteAuditStore, SqliteDelegationRepository,
    SqliteIntegrationRepository, SqliteProfileRepository, SqliteSwarmRepository,
    SqliteTaskRepository,
};
use warden::domain::errors::{DomainError, DomainResult};
use warden::domain::models::{
    AgentProfile, Config, RateRuleConfig, SwarmRole, SwarmStrategy, SwarmTemplate, Task,
};
use warden::domain::ports::{
    IntegrationFactory, NullLlmClient, ProfileRepository, SwarmRepository,
};
use warden::infrastructure::config::ConfigLoader;
use warden::infrastructure::logging::Logger;
use warden::services::{
    AuditChain, DelegationConfig, DelegationService, ExecutionContext, InputValidator,
    IntegrationManager, MetricsService, RateLimiterService, RbacService, SwarmManager,
    TaskExecutor, TaskHandler,
};

#[derive(Parser)]
#[command(name = "warden", version, about = "Secure local-first agent orchestration core")]
struct Cli {
    /// Explicit configuration file (defaults to .warden/config.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway and all background daemons.
    Serve,
    /// Validate the effective configuration and print it.
    CheckConfig,
    /// Audit chain maintenance.
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Recompute the whole chain and report the first broken link.
    Verify,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> DomainResult<()> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Audit {
            command: AuditCommands::Verify,
        } => audit_verify(&config).await,
        Commands::Serve => serve(config).await,
    }
}

fn check_config(config: &Config) -> DomainResult<()> {
    ConfigLoader::validate(config)?;
    let rendered = serde_yaml::to_string(config)
        .map_err(|e| DomainError::Config(format!("cannot render config: {e}")))?;
    println!("{rendered}");
    Ok(())
}

async fn audit_verify(config: &Config) -> DomainResult<()> {
    let db = open_database(config).await?;
    let store = Arc::new(SqliteAuditStore::new(db.pool()));
    let signing_key = ConfigLoader::resolve_signing_key(config)?;
    let chain = AuditChain::open(store, signing_key).await?;

    let report = chain.verify().await?;
    println!(
        "checked {} entries: {}",
        report.entries_checked,
        if report.ok { "chain intact" } else { "CHAIN BROKEN" }
    );
    if let Some(seq) = report.first_broken_seq {
        return Err(DomainError::Conflict(format!(
            "audit chain broken at seq {seq}"
        )));
    }
    Ok(())
}

async fn serve(config: Config) -> DomainResult<()> {
    let _logger = Logger::init(&config.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "warden starting");

    let db = open_database(&config).await?;
    let pool = db.pool();

    let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let swarm_repo: Arc<dyn SwarmRepository> = Arc::new(SqliteSwarmRepository::new(pool.clone()));
    let delegation_repo = Arc::new(SqliteDelegationRepository::new(pool.clone()));
    let profile_repo: Arc<dyn ProfileRepository> =
        Arc::new(SqliteProfileRepository::new(pool.clone()));
    let integration_repo = Arc::new(SqliteIntegrationRepository::new(pool.clone()));
    let audit_store = Arc::new(SqliteAuditStore::new(pool.clone()));

    let signing_key = ConfigLoader::resolve_signing_key(&config)?;
    let audit = Arc::new(AuditChain::open(audit_store, signing_key).await?);
    let rbac = RbacService::with_default_roles().await;
    let validator = Arc::new(InputValidator::new(config.validation.clone()));

    let mut rules = config.rate_rules.clone();
    if !rules.iter().any(|rule| rule.name == "task_creation") {
        rules.push(RateRuleConfig::task_creation_default());
    }
    let limiter = Arc::new(RateLimiterService::new(rules));

    let executor = TaskExecutor::new(
        config.executor.clone(),
        Arc::clone(&validator),
        Arc::clone(&limiter),
        Arc::clone(&rbac),
        Arc::clone(&audit),
        task_repo.clone(),
    );
    executor
        .register_handler(
            warden::domain::models::TaskType::Standard,
            Arc::new(EchoHandler),
        )
        .await;

    let delegations = Arc::new(DelegationService::new(
        Arc::clone(&profile_repo),
        delegation_repo.clone(),
        Arc::new(NullLlmClient),
        Arc::clone(&audit),
        DelegationConfig {
            max_depth: config.swarm.max_depth,
            default_timeout_ms: config.swarm.delegation_timeout_ms,
        },
    ));
    let swarms = Arc::new(SwarmManager::new(
        Arc::clone(&swarm_repo),
        delegation_repo.clone(),
        delegations,
        None,
        Arc::clone(&audit),
        config.swarm.clone(),
    ));

    seed_builtin_profiles(profile_repo.as_ref()).await?;
    seed_builtin_templates(swarm_repo.as_ref(), &config).await?;

    let integrations = IntegrationManager::new(
        integration_repo,
        Arc::clone(&audit),
        config.integrations.clone(),
    );
    let webhook_factory: Arc<dyn IntegrationFactory> = Arc::new(WebhookIntegration::boxed);
    integrations.register_factory("webhook", webhook_factory).await;
    if let Err(err) = integrations.start_all().await {
        tracing::error!(error = %err, "batch integration start reported an error");
    }
    let health_loop = integrations.spawn_health_loop();
    let inbound_recorder = integrations.spawn_inbound_recorder();

    let metrics = Arc::new(MetricsService::new(
        task_repo.clone(),
        Arc::clone(&executor),
        Arc::clone(&integrations),
        Arc::clone(&audit),
    ));

    let hub = WsHub::new(
        Arc::clone(&rbac),
        Arc::clone(&metrics),
        config.gateway.heartbeat_interval_ms,
        config.gateway.metrics_broadcast_ms,
    );
    let heartbeat = hub.spawn_heartbeat();
    let broadcaster = hub.spawn_metrics_broadcaster();
    hub.spawn_event_bridges(&executor, &audit);

    let auth = Arc::new(StaticTokenAuth::from_config(&config.gateway.auth_tokens)?);

    let state = AppState {
        config: Arc::new(config.gateway.clone()),
        executor: Arc::clone(&executor),
        task_repo: task_repo.clone(),
        swarms,
        audit: Arc::clone(&audit),
        rbac,
        auth,
        metrics,
        hub: Arc::clone(&hub),
    };

    let gateway = Gateway::new(state);
    gateway.serve(shutdown_signal()).await?;

    // Orderly teardown: stop daemons, close clients, flush the appender
    hub.shutdown();
    integrations.shutdown();
    if let Err(err) = integrations.stop_all().await {
        tracing::warn!(error = %err, "integration stop during shutdown");
    }
    limiter.stop();
    heartbeat.abort();
    broadcaster.abort();
    health_loop.abort();
    inbound_recorder.abort();
    db.close().await;
    tracing::info!("warden stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

async fn open_database(config: &Config) -> DomainResult<DatabaseConnection> {
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DomainError::Config(format!(
                    "database.path: cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }
    DatabaseConnection::new(
        &format!("sqlite:{}", config.database.path),
        config.database.max_connections,
    )
    .await
}

/// Built-in handler for `standard` tasks: returns the input unchanged so
/// the pipeline is exercisable before custom handlers are registered.
struct EchoHandler;

#[async_trait::async_trait]
impl TaskHandler for EchoHandler {
    fn required_permissions(&self) -> Vec<(String, String)> {
        vec![("tasks".to_string(), "create".to_string())]
    }

    async fn execute(
        &self,
        _task: &Task,
        input: &Value,
        _ctx: &ExecutionContext,
    ) -> DomainResult<Value> {
        Ok(input.clone())
    }
}

async fn seed_builtin_profiles(repo: &dyn ProfileRepository) -> DomainResult<()> {
    let builtins = [
        AgentProfile::new(
            "researcher",
            "You are a meticulous researcher. Gather the facts relevant to the task, \
             cite where each came from, and call out anything you could not verify.",
            "llama3.2",
            200_000,
        )
        .with_tools(vec!["web_search".into(), "read_file".into()]),
        AgentProfile::new(
            "coder",
            "You are a pragmatic software engineer. Produce working, minimal code \
             for the task, with the assumptions you made stated up front.",
            "llama3.2",
            200_000,
        )
        .with_tools(vec!["read_file".into(), "write_file".into()]),
        AgentProfile::new(
            "reviewer",
            "You are a critical reviewer. Examine the work in context for defects, \
             risks, and gaps, most severe first.",
            "llama3.2",
            100_000,
        ),
        AgentProfile::new(
            "synthesizer",
            "You merge multiple drafts into one coherent result, preserving every \
             substantive point and resolving contradictions explicitly.",
            "llama3.2",
            100_000,
        ),
    ];

    for profile in builtins {
        if repo.get_by_name(&profile.name).await?.is_none() {
            repo.create(&profile).await?;
        }
    }
    Ok(())
}

async fn seed_builtin_templates(
    repo: &dyn SwarmRepository,
    config: &Config,
) -> DomainResult<()> {
    let builtins = [
        SwarmTemplate::new(
            "research-trio",
            SwarmStrategy::Sequential,
            vec![
                SwarmRole::new("researcher", "researcher"),
                SwarmRole::new("coder", "coder"),
                SwarmRole::new("reviewer", "reviewer"),
            ],
        )
        .builtin(),
        SwarmTemplate::new(
            "panel",
            SwarmStrategy::Parallel,
            vec![
                SwarmRole::new("analyst", "researcher"),
                SwarmRole::new("engineer", "coder"),
                SwarmRole::new("critic", "reviewer"),
            ],
        )
        .with_coordinator("synthesizer")
        .builtin(),
        SwarmTemplate::new("solo-coordinator", SwarmStrategy::Dynamic, Vec::new())
            .with_coordinator(config.swarm.default_coordinator_profile.clone())
            .builtin(),
    ];

    for template in builtins {
        if repo.get_template_by_name(&template.name).await?.is_none() {
            repo.create_template(&template).await?;
        }
    }
    Ok(())
}
