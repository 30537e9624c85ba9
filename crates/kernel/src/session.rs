//! Session lifecycle.
//!
//! The session manager is the only component that creates session
//! records. It installs the FSM's initial state, tracks fast-store
//! liveness, and runs the tempo clock — the periodic sweep that parks
//! aged-out sessions behind a snapshot and rehydrates them when a
//! later event arrives.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use ms_domain::error::{Error, Result};
use ms_domain::flow::FlowDefinition;
use ms_domain::trace::TraceEvent;
use ms_store::blackboard::Blackboard;
use ms_store::fast::FastStore;
use ms_store::repo::{
    FlowRepository, SessionRecord, SessionRepository, SessionStatus, Snapshot,
    SnapshotRepository,
};

use crate::fsm::Fsm;

pub struct SessionManager {
    store: Arc<FastStore>,
    blackboard: Arc<Blackboard>,
    fsm: Arc<Fsm>,
    sessions: Arc<SessionRepository>,
    snapshots: Arc<SnapshotRepository>,
    flows: Arc<FlowRepository>,
    prefix: String,
    default_ttl_secs: u64,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<FastStore>,
        blackboard: Arc<Blackboard>,
        fsm: Arc<Fsm>,
        sessions: Arc<SessionRepository>,
        snapshots: Arc<SnapshotRepository>,
        flows: Arc<FlowRepository>,
        prefix: impl Into<String>,
        default_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            blackboard,
            fsm,
            sessions,
            snapshots,
            flows,
            prefix: prefix.into(),
            default_ttl_secs,
        }
    }

    fn live_key(&self, tenant_id: &str, session_id: &str) -> String {
        format!("{}:session:{tenant_id}:{session_id}", self.prefix)
    }

    // ── Creation ─────────────────────────────────────────────────────

    /// Create a session over a registered flow. The record is written
    /// in `running` with the FSM at the flow's initial state; the call
    /// returns immediately — node execution is driven separately.
    pub fn start_flow(
        &self,
        tenant_id: &str,
        flow_id: &str,
        params: serde_json::Value,
        trace_id: &str,
    ) -> Result<SessionRecord> {
        self.start_flow_with(tenant_id, flow_id, params, trace_id, false)
    }

    /// Create an implicit session over the synthetic two-state flow for
    /// a single node, registering that flow on first use.
    pub fn start_single_node(
        &self,
        tenant_id: &str,
        node_ref: &str,
        params: serde_json::Value,
        trace_id: &str,
    ) -> Result<SessionRecord> {
        let flow = FlowDefinition::single_node(node_ref);
        let flow_id = flow.name.clone();
        if self.flows.get(&flow_id).is_none() {
            self.flows.register(flow)?;
        }
        self.start_flow_with(tenant_id, &flow_id, params, trace_id, true)
    }

    fn start_flow_with(
        &self,
        tenant_id: &str,
        flow_id: &str,
        params: serde_json::Value,
        trace_id: &str,
        implicit: bool,
    ) -> Result<SessionRecord> {
        let flow = self
            .flows
            .get(flow_id)
            .ok_or_else(|| Error::FlowNotFound(flow_id.to_owned()))?;

        let now = Utc::now();
        let record = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_owned(),
            flow_id: flow_id.to_owned(),
            implicit,
            state: flow.initial_state.clone(),
            status: SessionStatus::Running,
            params,
            trace_id: trace_id.to_owned(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            ttl_secs: self.default_ttl_secs,
            attempts: Default::default(),
        };

        self.fsm
            .init(tenant_id, &record.session_id, &flow.initial_state);
        self.store.set_with_ttl(
            &self.live_key(tenant_id, &record.session_id),
            "1",
            Duration::from_secs(self.default_ttl_secs),
        );
        self.sessions.upsert(record.clone());

        TraceEvent::SessionStarted {
            tenant_id: tenant_id.to_owned(),
            session_id: record.session_id.clone(),
            flow_id: flow_id.to_owned(),
            implicit,
        }
        .emit();

        Ok(record)
    }

    /// Start a session over `new_flow_id`, seeding its blackboard with
    /// the source session's artifacts. The source is not modified;
    /// `from_step` is recorded for audit.
    pub fn inherit(
        &self,
        new_flow_id: &str,
        from_session_id: &str,
        from_step: &str,
        trace_id: &str,
    ) -> Result<SessionRecord> {
        let source = self
            .sessions
            .get(from_session_id)
            .ok_or_else(|| Error::SessionNotFound(from_session_id.to_owned()))?;

        let params = serde_json::json!({
            "inherited_from": from_session_id,
            "inherited_from_step": from_step,
        });
        let record = self.start_flow_with(&source.tenant_id, new_flow_id, params, trace_id, false)?;

        let artifact_ids = self.blackboard.list_artifacts(from_session_id);
        let copied = self.blackboard.copy_artifacts(
            from_session_id,
            &record.session_id,
            &artifact_ids,
        );
        tracing::info!(
            from = %from_session_id,
            to = %record.session_id,
            artifacts = copied,
            "session inherited"
        );
        Ok(record)
    }

    // ── Access ───────────────────────────────────────────────────────

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn list(&self) -> Vec<SessionRecord> {
        self.sessions.list()
    }

    /// Load a session for dispatching, rehydrating it from the cold
    /// snapshot when the tempo clock parked it. Refreshes TTLs.
    pub fn load_live(&self, session_id: &str) -> Result<(SessionRecord, FlowDefinition)> {
        let mut record = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;

        if record.status == SessionStatus::Paused {
            record = self.rehydrate(record)?;
        }

        let flow = self
            .flows
            .get(&record.flow_id)
            .ok_or_else(|| Error::FlowNotFound(record.flow_id.clone()))?;

        self.touch(&record.tenant_id, session_id);
        Ok((record, flow))
    }

    pub fn touch(&self, tenant_id: &str, session_id: &str) {
        let ttl = Duration::from_secs(self.default_ttl_secs);
        if !self
            .store
            .refresh_ttl(&self.live_key(tenant_id, session_id), ttl)
        {
            self.store
                .set_with_ttl(&self.live_key(tenant_id, session_id), "1", ttl);
        }
        self.sessions.update(session_id, |_| {});
    }

    /// Mutate the record (status, state, attempts) and persist.
    pub fn update<F>(&self, session_id: &str, f: F) -> Option<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        self.sessions.update(session_id, f)
    }

    // ── Tempo clock ──────────────────────────────────────────────────

    /// One sweep: park every session whose TTL elapsed. Returns how
    /// many sessions were paused.
    pub fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let stale = self.sessions.sweepable(now);
        let parked = stale.len();

        for record in stale {
            let idle = record.idle_secs(now);
            // Preserve any chat history the controller already saved.
            let prior = self.snapshots.get(&record.session_id);
            let (chat_history, tool_results, chat_summary, routed_scene) = match prior {
                Some(snap) => (
                    snap.chat_history,
                    snap.tool_results,
                    snap.chat_summary,
                    snap.routed_scene,
                ),
                None => (Vec::new(), serde_json::Value::Null, String::new(), None),
            };
            self.snapshots.save(Snapshot {
                session_id: record.session_id.clone(),
                chat_history,
                blackboard: self.blackboard.export(&record.session_id),
                tool_results,
                chat_summary,
                routed_scene,
                saved_at: now,
            });

            self.sessions.update(&record.session_id, |r| {
                r.status = SessionStatus::Paused;
            });
            self.store
                .remove(&self.live_key(&record.tenant_id, &record.session_id));
            self.fsm.clear(&record.tenant_id, &record.session_id);
            self.blackboard.remove(&record.session_id);

            TraceEvent::SessionPaused {
                session_id: record.session_id.clone(),
                idle_secs: idle,
            }
            .emit();
        }

        self.store.purge_expired();
        self.blackboard.purge_expired();
        parked
    }

    /// Spawn the periodic sweep task.
    pub fn spawn_tempo_clock(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let parked = manager.sweep_once();
                if parked > 0 {
                    tracing::info!(parked, "tempo clock sweep");
                }
            }
        })
    }

    fn rehydrate(&self, record: SessionRecord) -> Result<SessionRecord> {
        if let Some(snapshot) = self.snapshots.get(&record.session_id) {
            self.blackboard
                .import(&record.session_id, snapshot.blackboard);
        }
        self.fsm
            .init(&record.tenant_id, &record.session_id, &record.state);
        self.store.set_with_ttl(
            &self.live_key(&record.tenant_id, &record.session_id),
            "1",
            Duration::from_secs(self.default_ttl_secs),
        );
        let record = self
            .sessions
            .update(&record.session_id, |r| {
                r.status = SessionStatus::Idle;
            })
            .ok_or_else(|| Error::SessionNotFound(record.session_id.clone()))?;

        TraceEvent::SessionRehydrated {
            session_id: record.session_id.clone(),
        }
        .emit();
        Ok(record)
    }
}
