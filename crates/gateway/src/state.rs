use std::sync::Arc;

use ms_clients::{DataService, LlmClient, PostPolicySigner};
use ms_domain::config::Config;
use ms_kernel::fsm::Fsm;
use ms_kernel::reliability::HardStopper;
use ms_kernel::{Dispatcher, NodeRegistry, SessionManager};
use ms_store::blackboard::Blackboard;
use ms_store::bus::EventBus;
use ms_store::fast::FastStore;
use ms_store::repo::{EventRepository, FlowRepository, SnapshotRepository};

use crate::metrics::Metrics;
use crate::runtime::limits::TenantGate;

/// Shared application state passed to all API handlers.
///
/// Grouped by concern:
/// - **Config** — parsed `maestro.toml`
/// - **Stores** — fast store, blackboard, bus, durable repositories
/// - **Kernel** — FSM, registry, session manager, dispatcher, hard-stop
/// - **Clients** — LLM, data service, upload signer
/// - **Gateway** — admission control, counters
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Stores ────────────────────────────────────────────────────────
    pub store: Arc<FastStore>,
    pub blackboard: Arc<Blackboard>,
    pub bus: EventBus,
    pub events: Arc<EventRepository>,
    pub flows: Arc<FlowRepository>,
    pub snapshots: Arc<SnapshotRepository>,

    // ── Kernel ────────────────────────────────────────────────────────
    pub fsm: Arc<Fsm>,
    pub registry: Arc<NodeRegistry>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Dispatcher,
    pub hardstop: Arc<HardStopper>,

    // ── Clients ───────────────────────────────────────────────────────
    pub llm: Arc<dyn LlmClient>,
    pub data: Arc<dyn DataService>,
    /// `None` when no object-store endpoint is configured.
    pub signer: Option<Arc<PostPolicySigner>>,

    // ── Gateway ───────────────────────────────────────────────────────
    pub limits: Arc<TenantGate>,
    pub metrics: Arc<Metrics>,
}
