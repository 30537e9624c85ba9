//! The dispatcher — sole writer of state transitions and event records.
//!
//! For each incoming `(session, trigger)` pair it runs the eight-step
//! pipeline: abort check, atomic FSM advance, node resolution (with the
//! user-input gate), fan-in check, idempotency gate, execution (builtin
//! awaited in-process, webhook fired and forgotten until its callback),
//! result recording + bus fan-out, and finalization with retry
//! scheduling on failure.
//!
//! Event-record insertion order equals bus publish order per session:
//! both writes happen under [`Dispatcher::emit`]'s lock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use ms_domain::error::{Error, Result};
use ms_domain::event::{Event, EventType};
use ms_domain::flow::FlowDefinition;
use ms_domain::node::{NodeResult, NodeStatus};
use ms_domain::trace::TraceEvent;
use ms_store::blackboard::Blackboard;
use ms_store::bus::EventBus;
use ms_store::repo::{EventRepository, SessionStatus};

use crate::fsm::{Advance, Fsm};
use crate::registry::{NodeContext, NodeRegistry, ResolvedNode};
use crate::reliability::{Decision, FanInChecker, HardStopper, IdempotencyGuard, RetryPolicy};
use crate::session::SessionManager;

const MAX_ADVANCE_RETRIES: usize = 3;

type BoxedOutcome<'a> = Pin<Box<dyn Future<Output = Result<DispatchOutcome>> + Send + 'a>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// A builtin ran to completion (any terminal status — inspect the
    /// result).
    Executed { step: String, result: NodeResult },
    /// A webhook accepted the work; progress resumes via its callback.
    WebhookPending { step: String },
    /// The new state pauses for human input.
    WaitingUser { state: String },
    /// Fan-in prerequisites are not yet met; the missing branches will
    /// call back in.
    FanInPending { state: String, missing: Vec<String> },
    /// A prior attempt already succeeded; carries the recorded result
    /// event when one exists.
    SkippedIdempotent { step: String, prior: Option<Event> },
    /// Another dispatcher invocation holds this step right now.
    Busy { step: String },
    /// Advanced into a terminal state.
    Terminal { state: String },
    /// The new state maps to no node; the session waits for the next
    /// event.
    NoNode { state: String },
    /// The session is aborted; nothing was executed.
    Aborted,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    fsm: Arc<Fsm>,
    registry: Arc<NodeRegistry>,
    guard: IdempotencyGuard,
    fanin: FanInChecker,
    hardstop: Arc<HardStopper>,
    retry: RetryPolicy,
    events: Arc<EventRepository>,
    bus: EventBus,
    blackboard: Arc<Blackboard>,
    http: reqwest::Client,
    webhook_timeout: Duration,
    callback_base: String,
    /// Serializes (append, publish) pairs so repository order matches
    /// bus order within a session.
    publish_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionManager>,
        fsm: Arc<Fsm>,
        registry: Arc<NodeRegistry>,
        guard: IdempotencyGuard,
        fanin: FanInChecker,
        hardstop: Arc<HardStopper>,
        retry: RetryPolicy,
        events: Arc<EventRepository>,
        bus: EventBus,
        blackboard: Arc<Blackboard>,
        webhook_timeout: Duration,
        callback_base: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            fsm,
            registry,
            guard,
            fanin,
            hardstop,
            retry,
            events,
            bus,
            blackboard,
            http: reqwest::Client::new(),
            webhook_timeout,
            callback_base: callback_base.into(),
            publish_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Append to the event log and publish on the bus as one serialized
    /// step. Returns the tick-stamped event.
    async fn emit(&self, tenant_id: &str, event: Event) -> Event {
        let _guard = self.publish_lock.lock().await;
        let event = self.events.append(event);
        self.bus.publish(tenant_id, &event).await;
        event
    }

    // ── Entry points ─────────────────────────────────────────────────

    /// Feed a control or user event into a session's FSM pipeline.
    pub async fn push_event(
        &self,
        session_id: &str,
        event: &str,
        payload: Value,
        source: &str,
    ) -> Result<DispatchOutcome> {
        self.push_event_inner(
            session_id.to_owned(),
            event.to_owned(),
            payload,
            source.to_owned(),
            true,
        )
        .await
    }

    /// Execute the initial state of a freshly started session (no FSM
    /// advance — the session manager already installed the state).
    pub async fn run_initial(&self, session_id: &str) -> Result<DispatchOutcome> {
        let (record, flow) = self.sessions.load_live(session_id)?;
        if self.hardstop.is_aborted(&record.tenant_id, session_id) {
            return self.record_abort_refusal(&record.tenant_id, session_id, &record.trace_id).await;
        }
        let to = flow.initial_state.clone();
        self.enter_state(
            record.tenant_id,
            session_id.to_owned(),
            record.trace_id,
            flow,
            String::new(),
            to,
            false,
            record.params,
        )
        .await
    }

    /// Run one builtin against an existing session without advancing
    /// its FSM. The chat controller uses this for planner tool calls:
    /// artifacts and audit events land on the hosting session, and the
    /// idempotency gate keys on the caller-supplied `step`.
    pub async fn execute_tool(
        &self,
        session_id: &str,
        node_id: &str,
        step: &str,
        params: Value,
    ) -> Result<DispatchOutcome> {
        let (record, _flow) = self.sessions.load_live(session_id)?;
        if self.hardstop.is_aborted(&record.tenant_id, session_id) {
            return self.record_abort_refusal(&record.tenant_id, session_id, &record.trace_id).await;
        }
        self.execute_step(
            record.tenant_id,
            session_id.to_owned(),
            record.trace_id,
            None,
            step.to_owned(),
            format!("builtin://{node_id}"),
            merge_params(&record.params, &params),
            1,
        )
        .await
    }

    /// Complete a webhook dispatch from its callback body.
    pub async fn webhook_callback(
        &self,
        session_id: &str,
        step: &str,
        result: NodeResult,
    ) -> Result<DispatchOutcome> {
        let (record, flow) = self.sessions.load_live(session_id)?;
        let attempt = self.guard.last_attempt(session_id, step).unwrap_or(1);
        TraceEvent::WebhookCallback {
            session_id: session_id.to_owned(),
            step: step.to_owned(),
            post_abort: self.hardstop.is_aborted(&record.tenant_id, session_id),
        }
        .emit();
        self.record_result(
            record.tenant_id,
            session_id.to_owned(),
            record.trace_id,
            Some(flow),
            step.to_owned(),
            attempt,
            result,
        )
        .await
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Boxed so the success-chain recursion
    /// (`record_result` → `push_event_inner` → `enter_state` →
    /// `execute_step` → `record_result`) has a finite future size.
    fn push_event_inner(
        &self,
        session_id: String,
        event: String,
        payload: Value,
        source: String,
        record_trigger: bool,
    ) -> BoxedOutcome<'_> {
        Box::pin(async move {
            let (record, flow) = self.sessions.load_live(&session_id)?;
            let tenant_id = record.tenant_id.clone();
            let trace_id = record.trace_id.clone();

            // 1. Abort check.
            if self.hardstop.is_aborted(&tenant_id, &session_id) {
                return self.record_abort_refusal(&tenant_id, &session_id, &trace_id).await;
            }

            // 2. Audit the trigger itself (internal chain triggers are
            //    already recorded as STEP_DONE by record_result).
            if record_trigger {
                self.emit(
                    &tenant_id,
                    Event::new(
                        EventType::parse(&event),
                        &tenant_id,
                        &session_id,
                        &source,
                        &trace_id,
                    )
                    .with_payload(payload.clone()),
                )
                .await;
            }

            // 3. Fan-in re-entry: when a late branch reports into the
            //    state the session already occupies, the FSM does not
            //    move — the fan-in check simply runs again with the new
            //    branch recorded.
            if let Some(current) = self.fsm.current(&tenant_id, &session_id) {
                let reentry = flow.transitions.iter().any(|t| {
                    t.to == current && t.fan_in && t.event == event && t.from == source
                });
                if reentry {
                    return self
                        .enter_state(
                            tenant_id,
                            session_id,
                            trace_id,
                            flow,
                            source,
                            current,
                            true,
                            merge_params(&record.params, &payload),
                        )
                        .await;
                }
            }

            // 4. Atomic FSM advance with a bounded conflict-retry loop.
            let mut advance = None;
            for round in 0..MAX_ADVANCE_RETRIES {
                match self.fsm.advance_atomic(&flow, &tenant_id, &session_id, &event)? {
                    Advance::Advanced { from, to, fan_in } => {
                        advance = Some((from, to, fan_in));
                        break;
                    }
                    Advance::Conflict { current } => {
                        tracing::debug!(
                            session_id = %session_id,
                            event = %event,
                            current = %current,
                            round,
                            "fsm advance lost the race, retrying"
                        );
                    }
                }
            }
            let Some((from, to, fan_in)) = advance else {
                return Err(Error::Conflict(format!(
                    "fsm advance for {event} on {session_id} lost {MAX_ADVANCE_RETRIES} races"
                )));
            };

            TraceEvent::StateTransition {
                session_id: session_id.clone(),
                from: from.clone(),
                to: to.clone(),
                event: event.clone(),
            }
            .emit();
            self.emit(
                &tenant_id,
                Event::new(
                    EventType::StateTransition,
                    &tenant_id,
                    &session_id,
                    "fsm",
                    &trace_id,
                )
                .with_states(&from, &to)
                .with_payload(serde_json::json!({ "event": event })),
            )
            .await;
            self.sessions.update(&session_id, |r| {
                r.state = to.clone();
            });

            self.enter_state(
                tenant_id,
                session_id,
                trace_id,
                flow,
                from,
                to,
                fan_in,
                merge_params(&record.params, &payload),
            )
            .await
        })
    }

    /// Steps 3–6 for a state just entered: terminal/user-input gates,
    /// node resolution, fan-in, then execution.
    #[allow(clippy::too_many_arguments)]
    async fn enter_state(
        &self,
        tenant_id: String,
        session_id: String,
        trace_id: String,
        flow: FlowDefinition,
        from: String,
        to: String,
        fan_in: bool,
        params: Value,
    ) -> Result<DispatchOutcome> {
        if FlowDefinition::is_terminal(&to) {
            let status = match to.as_str() {
                "end" => SessionStatus::Completed,
                "aborted" => SessionStatus::Aborted,
                _ => SessionStatus::Error,
            };
            self.sessions.update(&session_id, |r| {
                r.status = status;
                if status.is_terminal() {
                    r.completed_at = Some(chrono::Utc::now());
                }
            });
            return Ok(DispatchOutcome::Terminal { state: to });
        }

        if flow.is_user_input(&to) {
            self.sessions.update(&session_id, |r| {
                r.status = SessionStatus::WaitingUser;
            });
            self.emit(
                &tenant_id,
                Event::new(
                    EventType::NeedUserInput,
                    &tenant_id,
                    &session_id,
                    "dispatcher",
                    &trace_id,
                )
                .with_payload(serde_json::json!({ "state": to })),
            )
            .await;
            return Ok(DispatchOutcome::WaitingUser { state: to });
        }

        let Some(node_ref) = flow.state_node_map.get(&to).cloned() else {
            self.sessions.update(&session_id, |r| {
                r.status = SessionStatus::Idle;
            });
            return Ok(DispatchOutcome::NoNode { state: to });
        };

        if fan_in {
            let prereqs = flow.fan_in_prerequisites(&to, &from);
            if !self.fanin.ready(&session_id, &prereqs) {
                let missing = self.fanin.missing(&session_id, &prereqs);
                TraceEvent::FanInPending {
                    session_id: session_id.clone(),
                    step: to.clone(),
                    missing: missing.clone(),
                }
                .emit();
                self.emit(
                    &tenant_id,
                    Event::new(
                        EventType::EventPendingFanin,
                        &tenant_id,
                        &session_id,
                        "dispatcher",
                        &trace_id,
                    )
                    .with_payload(serde_json::json!({ "state": to, "missing": missing })),
                )
                .await;
                return Ok(DispatchOutcome::FanInPending { state: to, missing });
            }
        }

        let attempt = self
            .sessions
            .get(&session_id)
            .and_then(|r| r.attempts.get(&to).copied())
            .unwrap_or(1)
            .max(1);
        self.sessions.update(&session_id, |r| {
            r.status = SessionStatus::Running;
            r.attempts.insert(to.clone(), attempt);
        });

        self.execute_step(
            tenant_id, session_id, trace_id, Some(flow), to, node_ref, params, attempt,
        )
        .await
    }

    /// Steps 5–6: the idempotency gate and the actual invocation.
    /// Boxed (like `push_event_inner`) because the retry task re-enters
    /// it from inside `record_result`.
    #[allow(clippy::too_many_arguments)]
    fn execute_step(
        &self,
        tenant_id: String,
        session_id: String,
        trace_id: String,
        flow: Option<FlowDefinition>,
        step: String,
        node_ref: String,
        params: Value,
        attempt: u32,
    ) -> BoxedOutcome<'_> {
        Box::pin(async move {
            match self.guard.before(&session_id, &step, attempt) {
                Decision::Skip(_) => {
                    TraceEvent::StepSkippedIdempotent {
                        session_id: session_id.clone(),
                        step: step.clone(),
                        attempt,
                    }
                    .emit();
                    let prior = self
                        .events
                        .list_by_session(&session_id)
                        .into_iter()
                        .rev()
                        .find(|e| e.source == step && e.event_type == EventType::EventResult);
                    return Ok(DispatchOutcome::SkippedIdempotent { step, prior });
                }
                Decision::Busy => {
                    return Ok(DispatchOutcome::Busy { step });
                }
                Decision::Proceed => {}
            }

            let resolved = match self.registry.resolve(&node_ref) {
                Ok(r) => r,
                Err(e) => {
                    // Resolution failure is fatal for the transition.
                    self.emit(
                        &tenant_id,
                        Event::new(
                            EventType::EventError,
                            &tenant_id,
                            &session_id,
                            &step,
                            &trace_id,
                        )
                        .with_payload(serde_json::json!({
                            "error": e.to_string(),
                            "node_ref": node_ref,
                        })),
                    )
                    .await;
                    self.guard.after(&session_id, &step, attempt, false, None);
                    if let Some(flow) = &flow {
                        self.fail_state(&tenant_id, &session_id, flow, &step).await;
                    }
                    return Err(e);
                }
            };

            TraceEvent::NodeDispatched {
                session_id: session_id.clone(),
                step: step.clone(),
                node_ref: node_ref.clone(),
                attempt,
            }
            .emit();

            match resolved {
                ResolvedNode::Builtin(node) => {
                    let started = Instant::now();
                    let ctx = NodeContext {
                        tenant_id: tenant_id.clone(),
                        session_id: session_id.clone(),
                        step: step.clone(),
                        params,
                        trace_id: trace_id.clone(),
                        blackboard: self.blackboard.clone(),
                    };
                    let result = match node.execute(ctx).await {
                        Ok(result) => result,
                        Err(e) => NodeResult::error(e.to_string()),
                    };
                    TraceEvent::NodeCompleted {
                        session_id: session_id.clone(),
                        step: step.clone(),
                        status: format!("{:?}", result.status).to_lowercase(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                    .emit();
                    self.record_result(
                        tenant_id, session_id, trace_id, flow, step, attempt, result,
                    )
                    .await
                }
                ResolvedNode::Webhook { node_id, url, .. } => {
                    let callback_url =
                        format!("{}/api/workflow/{}/callback", self.callback_base, session_id);
                    let body = serde_json::json!({
                        "session_id": session_id,
                        "step": step,
                        "params": params,
                        "callback_url": callback_url,
                        "trace_id": trace_id,
                    });
                    let response = self
                        .http
                        .post(&url)
                        .timeout(self.webhook_timeout)
                        .header("X-Tenant-Id", &tenant_id)
                        .header("X-Trace-Id", &trace_id)
                        .json(&body)
                        .send()
                        .await;

                    match response {
                        Ok(resp) if resp.status().is_success() => {
                            tracing::info!(
                                session_id = %session_id,
                                step = %step,
                                node_id = %node_id,
                                "webhook accepted, awaiting callback"
                            );
                            // The started idempotency row is the pending
                            // marker; the callback finalizes it.
                            Ok(DispatchOutcome::WebhookPending { step })
                        }
                        Ok(resp) => {
                            let result = NodeResult::error(format!(
                                "webhook {node_id} returned HTTP {}",
                                resp.status()
                            ));
                            self.record_result(
                                tenant_id, session_id, trace_id, flow, step, attempt, result,
                            )
                            .await
                        }
                        Err(e) => {
                            let result =
                                NodeResult::error(format!("webhook {node_id} call failed: {e}"));
                            self.record_result(
                                tenant_id, session_id, trace_id, flow, step, attempt, result,
                            )
                            .await
                        }
                    }
                }
            }
        })
    }

    /// Steps 7–8: artifacts, audit + fan-out, FSM follow-up, idempotency
    /// finalization, retry scheduling.
    #[allow(clippy::too_many_arguments)]
    async fn record_result(
        &self,
        tenant_id: String,
        session_id: String,
        trace_id: String,
        flow: Option<FlowDefinition>,
        step: String,
        attempt: u32,
        result: NodeResult,
    ) -> Result<DispatchOutcome> {
        // Results landing after an abort are audit-only.
        if self.hardstop.is_aborted(&tenant_id, &session_id) {
            self.emit(
                &tenant_id,
                Event::new(
                    EventType::EventResult,
                    &tenant_id,
                    &session_id,
                    &step,
                    &trace_id,
                )
                .with_payload(serde_json::json!({
                    "status": result.status,
                    "post_abort": true,
                    "attempt": attempt,
                })),
            )
            .await;
            self.guard.after(
                &session_id,
                &step,
                attempt,
                result.status == NodeStatus::Success,
                Some(result.digest()),
            );
            return Ok(DispatchOutcome::Aborted);
        }

        // Persist declared artifacts (identifier = map key).
        for (artifact_id, value) in &result.artifacts {
            if let Err(e) =
                self.blackboard
                    .write_artifact(&session_id, artifact_id, value.clone())
            {
                tracing::debug!(
                    session_id = %session_id,
                    artifact_id = %artifact_id,
                    error = %e,
                    "artifact already present, keeping first write"
                );
            }
        }

        let event_type = match result.status {
            NodeStatus::Success | NodeStatus::NeedUserInput => EventType::EventResult,
            NodeStatus::Error => EventType::EventError,
            NodeStatus::Aborted => EventType::EventAborted,
        };
        self.emit(
            &tenant_id,
            Event::new(event_type, &tenant_id, &session_id, &step, &trace_id).with_payload(
                serde_json::json!({
                    "status": result.status,
                    "result": result.result,
                    "ui_schema": result.ui_schema,
                    "error_message": result.error_message,
                    "attempt": attempt,
                }),
            ),
        )
        .await;

        match result.status {
            NodeStatus::Success => {
                self.guard.after(
                    &session_id,
                    &step,
                    attempt,
                    true,
                    Some(result.digest()),
                );
                self.emit(
                    &tenant_id,
                    Event::new(
                        EventType::StepDone,
                        &tenant_id,
                        &session_id,
                        &step,
                        &trace_id,
                    )
                    .with_payload(serde_json::json!({ "status": "success" })),
                )
                .await;

                if flow.is_some() {
                    let triggers: Vec<String> = if result.next_events.is_empty() {
                        vec!["STEP_DONE".to_owned()]
                    } else {
                        result.next_events.clone()
                    };
                    for trigger in triggers {
                        let chained = self
                            .push_event_inner(
                                session_id.clone(),
                                trigger.clone(),
                                Value::Null,
                                step.clone(),
                                false,
                            )
                            .await;
                        if let Err(e) = chained {
                            tracing::warn!(
                                session_id = %session_id,
                                trigger = %trigger,
                                error = %e,
                                "follow-up trigger halted"
                            );
                        }
                    }
                }
                Ok(DispatchOutcome::Executed { step, result })
            }
            NodeStatus::NeedUserInput => {
                // The panel is out; re-running the step would duplicate
                // it, so the row finalizes as success.
                self.guard.after(
                    &session_id,
                    &step,
                    attempt,
                    true,
                    Some(result.digest()),
                );
                self.sessions.update(&session_id, |r| {
                    r.status = SessionStatus::WaitingUser;
                });
                self.emit(
                    &tenant_id,
                    Event::new(
                        EventType::NeedUserInput,
                        &tenant_id,
                        &session_id,
                        &step,
                        &trace_id,
                    )
                    .with_payload(serde_json::json!({ "state": step })),
                )
                .await;
                Ok(DispatchOutcome::Executed { step, result })
            }
            NodeStatus::Aborted => {
                self.guard.after(&session_id, &step, attempt, false, None);
                self.sessions.update(&session_id, |r| {
                    r.status = SessionStatus::Aborted;
                });
                Ok(DispatchOutcome::Executed { step, result })
            }
            NodeStatus::Error => {
                self.guard.after(&session_id, &step, attempt, false, None);
                if flow.is_some() && self.retry.allows(attempt) {
                    let delay = self.retry.delay(attempt);
                    TraceEvent::RetryScheduled {
                        session_id: session_id.clone(),
                        step: step.clone(),
                        attempt: attempt + 1,
                        delay_ms: delay.as_millis() as u64,
                    }
                    .emit();
                    self.sessions.update(&session_id, |r| {
                        r.attempts.insert(step.clone(), attempt + 1);
                    });

                    let dispatcher = self.clone();
                    let (t, s, tr, fl, st) = (
                        tenant_id,
                        session_id,
                        trace_id,
                        flow,
                        step.clone(),
                    );
                    let node_ref = fl
                        .as_ref()
                        .and_then(|f| f.state_node_map.get(&st).cloned())
                        .unwrap_or_default();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let params = dispatcher
                            .sessions
                            .get(&s)
                            .map(|r| r.params.clone())
                            .unwrap_or(Value::Null);
                        let retried = dispatcher
                            .execute_step(
                                t,
                                s.clone(),
                                tr,
                                fl,
                                st.clone(),
                                node_ref,
                                params,
                                attempt + 1,
                            )
                            .await;
                        if let Err(e) = retried {
                            tracing::warn!(session_id = %s, step = %st, error = %e, "retry failed");
                        }
                    });
                } else if let Some(flow) = &flow {
                    self.fail_state(&tenant_id, &session_id, flow, &step).await;
                }
                Ok(DispatchOutcome::Executed { step, result })
            }
        }
    }

    /// Retry budget exhausted (or node unresolvable): move the session
    /// to its error state — through a declared ERROR transition when the
    /// flow has one, by force otherwise.
    async fn fail_state(
        &self,
        tenant_id: &str,
        session_id: &str,
        flow: &FlowDefinition,
        step: &str,
    ) {
        let has_error_transition = flow
            .transition_for(step, "ERROR")
            .is_some();
        if has_error_transition {
            let outcome = self
                .push_event_inner(
                    session_id.to_owned(),
                    "ERROR".to_owned(),
                    serde_json::json!({ "step": step }),
                    step.to_owned(),
                    true,
                )
                .await;
            if outcome.is_ok() {
                return;
            }
        }
        self.fsm.force(tenant_id, session_id, "error");
        self.sessions.update(session_id, |r| {
            r.state = "error".into();
            r.status = SessionStatus::Error;
        });
    }

    async fn record_abort_refusal(
        &self,
        tenant_id: &str,
        session_id: &str,
        trace_id: &str,
    ) -> Result<DispatchOutcome> {
        self.emit(
            tenant_id,
            Event::new(
                EventType::EventAborted,
                tenant_id,
                session_id,
                "dispatcher",
                trace_id,
            ),
        )
        .await;
        Ok(DispatchOutcome::Aborted)
    }
}

/// Shallow-merge two JSON objects; non-object overlays win wholesale.
fn merge_params(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (k, v) in o {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}
