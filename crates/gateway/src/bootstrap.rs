//! AppState construction — the shared boot path for `maestro serve`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use ms_clients::{HttpDataService, HttpLlmClient, PostPolicySigner};
use ms_domain::config::{Config, ConfigSeverity};
use ms_domain::flow::FlowDefinition;
use ms_kernel::fsm::Fsm;
use ms_kernel::reliability::{FanInChecker, HardStopper, IdempotencyGuard, RetryPolicy};
use ms_kernel::{Dispatcher, NodeRegistry, SessionManager};
use ms_store::blackboard::Blackboard;
use ms_store::bus::EventBus;
use ms_store::fast::FastStore;
use ms_store::repo::{
    EventRepository, FlowRepository, IdempotencyLog, NodeRepository, SessionRepository,
    SnapshotRepository,
};

use crate::metrics::Metrics;
use crate::runtime::limits::TenantGate;
use crate::state::AppState;

/// The flow backing plain chat sessions: a single long-lived state, no
/// transitions — tool calls run against the session without moving it.
fn chat_flow() -> FlowDefinition {
    FlowDefinition {
        name: "chat".into(),
        description: "conversation session (no state machine)".into(),
        states: vec!["chat".into(), "end".into()],
        initial_state: "chat".into(),
        transitions: Vec::new(),
        state_node_map: Default::default(),
        user_input_states: Vec::new(),
    }
}

/// Validate config, wire every subsystem, spawn the tempo clock, and
/// return a fully-built [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state_path = &config.store.state_path;
    let prefix = config.store.prefix.clone();

    // ── Durable repositories ─────────────────────────────────────────
    let events = Arc::new(EventRepository::open(state_path).context("opening event log")?);
    let idempotency =
        Arc::new(IdempotencyLog::open(state_path).context("opening idempotency log")?);
    let session_repo =
        Arc::new(SessionRepository::open(state_path).context("opening session repository")?);
    let snapshots =
        Arc::new(SnapshotRepository::open(state_path).context("opening snapshot repository")?);
    let flows = Arc::new(FlowRepository::open(state_path).context("opening flow repository")?);
    let node_repo = Arc::new(NodeRepository::open(state_path).context("opening node registry")?);
    tracing::info!(path = %state_path.display(), "durable repositories ready");

    // ── Fast store tier ──────────────────────────────────────────────
    let store = Arc::new(FastStore::new());
    let blackboard = Arc::new(Blackboard::new(Duration::from_secs(
        config.store.session_ttl_secs,
    )));
    let bus = EventBus::new(prefix.clone());
    let fsm = Arc::new(Fsm::new(store.clone(), prefix.clone()));

    // ── External clients ─────────────────────────────────────────────
    let api_key = std::env::var(&config.llm.api_key_env).ok();
    if api_key.is_none() {
        tracing::warn!(
            env = %config.llm.api_key_env,
            "LLM api key env var unset, calling the provider unauthenticated"
        );
    }
    let llm = Arc::new(HttpLlmClient::new(
        config.llm.base_url.clone(),
        api_key,
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));
    let data = Arc::new(HttpDataService::new(
        config.data_service.base_url.clone(),
        Duration::from_secs(config.data_service.timeout_secs),
    ));
    let signer = PostPolicySigner::from_config(&config.object_store).map(Arc::new);
    tracing::info!(
        llm = %config.llm.base_url,
        data_service = %config.data_service.base_url,
        upload_signing = signer.is_some(),
        "external clients ready"
    );

    // ── Node registry + builtins ─────────────────────────────────────
    let registry = Arc::new(NodeRegistry::new(node_repo));
    ms_nodes::register_builtins(&registry, llm.clone(), data.clone());
    tracing::info!(builtins = registry.builtin_count(), "node registry ready");

    // ── Flows ────────────────────────────────────────────────────────
    flows
        .register(chat_flow())
        .context("registering the chat flow")?;
    let loaded = flows.load_dir(&config.flows.path);
    tracing::info!(
        loaded,
        total = flows.count(),
        path = %config.flows.path.display(),
        "flow definitions ready"
    );

    // ── Kernel ───────────────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        blackboard.clone(),
        fsm.clone(),
        session_repo,
        snapshots.clone(),
        flows.clone(),
        prefix.clone(),
        config.store.session_ttl_secs,
    ));
    let hardstop = Arc::new(HardStopper::new(
        store.clone(),
        blackboard.clone(),
        bus.clone(),
        events.clone(),
        prefix,
    ));
    let dispatcher = Dispatcher::new(
        sessions.clone(),
        fsm.clone(),
        registry.clone(),
        IdempotencyGuard::new(idempotency),
        FanInChecker::new(events.clone()),
        hardstop.clone(),
        RetryPolicy::from_config(&config.retry),
        events.clone(),
        bus.clone(),
        blackboard.clone(),
        Duration::from_secs(config.flows.webhook_timeout_secs),
        config.server.public_base(),
    );
    tracing::info!("dispatcher ready");

    // ── Tempo clock ──────────────────────────────────────────────────
    sessions.spawn_tempo_clock(Duration::from_secs(config.store.sweep_interval_secs));
    tracing::info!(
        interval_secs = config.store.sweep_interval_secs,
        "tempo clock running"
    );

    Ok(AppState {
        limits: Arc::new(TenantGate::new(config.chat.max_inflight_per_tenant)),
        metrics: Arc::new(Metrics::default()),
        config,
        store,
        blackboard,
        bus,
        events,
        flows,
        snapshots,
        fsm,
        registry,
        sessions,
        dispatcher,
        hardstop,
        llm,
        data,
        signer,
    })
}
