//! Turn orchestration. One coordinator owns the whole lifecycle of a
//! turn: opening it against the execution row, driving model cycles,
//! dispatching tool batches, suspending across hand-offs and folding
//! resumptions back in. Every state write goes through the store's
//! compare-and-set so a superseded turn silently loses instead of
//! corrupting a newer one.

pub mod router;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::approval::{ApprovalDecision, ApprovalWorkflow};
use crate::core::bridge::{DispatchTransport, HandoffPayload, ResumeEvent};
use crate::core::dispatch::{
    ActionContext, ActionOutcome, CapabilityHandler, CapabilityRegistry, FailurePolicy,
    run_capability,
};
use crate::core::gateway::ModelGateway;
use crate::core::notify::Notifier;
use crate::core::prompt::PromptBuilder;
use crate::core::store::TurnStore;
use crate::core::types::{
    ActionStatus, DecisionStep, Execution, ExecutionStatus, NewMessage, PendingAction, ToolCall,
};
use router::{BatchPlan, RouteDecision};

/// What a user-facing caller ultimately sees for one turn attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final reply and the execution is idle again.
    Completed { reply: String },
    /// The turn parked itself and will resume through a hand-off.
    Suspended { status: ExecutionStatus },
    /// A newer turn owns the execution; this work was discarded.
    Superseded,
    /// The execution is mid-turn and cannot take another message yet.
    Busy,
    /// The turn ended in failure with a sanitized explanation.
    Failed { message: String },
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TurnConfig {
    /// Hard ceiling on model cycles per turn.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Run follow-up model cycles in the same unit of work. When false
    /// the turn parks as awaiting_followup and the ordered queue carries
    /// it forward.
    #[serde(default = "default_true")]
    pub inline_followup: bool,
    /// Execute an inline tool batch concurrently instead of in order.
    #[serde(default)]
    pub parallel_tool_batch: bool,
    /// Drop transient model commentary (text alongside tool calls) from
    /// the notification stream. The transcript records it either way.
    #[serde(default = "default_true")]
    pub suppress_transient_output: bool,
    /// Who gets asked when a capability needs sign-off.
    #[serde(default)]
    pub approvers: Vec<String>,
}

fn default_max_cycles() -> u32 {
    8
}
fn default_true() -> bool {
    true
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            inline_followup: true,
            parallel_tool_batch: false,
            suppress_transient_output: true,
            approvers: Vec::new(),
        }
    }
}

/// Backoff before re-delivering a hand-off that lost the claim race to a
/// sibling resumption of the same turn.
const REDELIVERY_DELAY: Duration = Duration::from_millis(25);

const PROVIDER_FAILURE_REPLY: &str =
    "I couldn't reach the language model after several attempts. Please try again shortly.";
const CYCLE_LIMIT_REPLY: &str =
    "I had to stop: this request needed more reasoning cycles than allowed.";

/// Decides whether a status move is legal at all, independent of the
/// compare-and-set that guards against races.
pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;
    match (from, to) {
        (Idle | Failed, Processing) => true,
        (Processing, Processing | AwaitingAction | AwaitingFollowup | AwaitingApproval) => true,
        (Processing, Idle | Failed) => true,
        (AwaitingAction | AwaitingFollowup | AwaitingApproval, Processing | Failed) => true,
        (AwaitingApproval, AwaitingAction) => true,
        _ => false,
    }
}

pub struct TurnCoordinator {
    store: Arc<TurnStore>,
    gateway: Arc<ModelGateway>,
    registry: Arc<CapabilityRegistry>,
    prompt: Arc<dyn PromptBuilder>,
    approval: Arc<dyn ApprovalWorkflow>,
    transport: Arc<dyn DispatchTransport>,
    notifier: Notifier,
    config: TurnConfig,
}

impl TurnCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<TurnStore>,
        gateway: Arc<ModelGateway>,
        registry: Arc<CapabilityRegistry>,
        prompt: Arc<dyn PromptBuilder>,
        approval: Arc<dyn ApprovalWorkflow>,
        transport: Arc<dyn DispatchTransport>,
        notifier: Notifier,
        config: TurnConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            registry,
            prompt,
            approval,
            transport,
            notifier,
            config,
        }
    }

    /// Checked wrapper around the store's compare-and-set: illegal moves
    /// are a logic error, lost races are a normal `false`.
    async fn transition(
        &self,
        execution_id: &str,
        from: ExecutionStatus,
        from_turn: &str,
        to: ExecutionStatus,
        to_turn: &str,
        cycle_count: u32,
    ) -> Result<bool> {
        if !can_transition(from, to) {
            return Err(anyhow!(
                "Illegal status transition {} -> {}",
                from.as_str(),
                to.as_str()
            ));
        }
        self.store
            .transition_execution(execution_id, from, from_turn, to, to_turn, cycle_count)
            .await
    }

    /// Opens a new turn for a user message. An execution mid-cycle stays
    /// busy; any parked or failed execution is superseded, with the old
    /// turn's in-flight work discarded by the staleness guard when it
    /// eventually reports back.
    pub async fn start_turn(
        &self,
        execution_id: &str,
        owner: &str,
        agent_profile: &str,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        let execution = match self.store.get_execution(execution_id).await? {
            Some(existing) => existing,
            None => {
                self.store
                    .create_execution(execution_id, owner, agent_profile)
                    .await?
            }
        };

        if execution.status == ExecutionStatus::Processing {
            debug!("Execution {} is mid-turn, rejecting new message", execution_id);
            return Ok(TurnOutcome::Busy);
        }
        if execution.status.is_suspended() {
            info!(
                "Superseding {} turn {} on execution {}",
                execution.status.as_str(),
                execution.current_turn_id,
                execution_id
            );
        }

        let turn_id = uuid::Uuid::new_v4().to_string();
        let moved = self
            .transition(
                execution_id,
                execution.status,
                &execution.current_turn_id,
                ExecutionStatus::Processing,
                &turn_id,
                0,
            )
            .await?;
        if !moved {
            // Another message won the race for this execution.
            return Ok(TurnOutcome::Busy);
        }

        self.store
            .append_message(execution_id, &turn_id, NewMessage::user(user_text))
            .await?;
        self.notifier.status(execution_id, "processing");

        self.run_cycles(execution_id, &turn_id, 0).await
    }

    /// Re-entry point for every hand-off. The staleness guard runs before
    /// anything in the payload is trusted: a mismatched turn id means a
    /// newer turn owns the execution and this delivery is a silent no-op.
    pub async fn resume_turn(&self, payload: HandoffPayload) -> Result<TurnOutcome> {
        let Some(execution) = self.store.get_execution(&payload.execution_id).await? else {
            warn!("Hand-off for unknown execution {}", payload.execution_id);
            return Ok(TurnOutcome::Superseded);
        };
        if execution.current_turn_id != payload.turn_id {
            debug!(
                "Discarding stale hand-off: turn {} superseded by {}",
                payload.turn_id, execution.current_turn_id
            );
            return Ok(TurnOutcome::Superseded);
        }

        match payload.event {
            ResumeEvent::ActionReady { ref action_id } => {
                self.resume_action(&execution, action_id, payload.chain_depth)
                    .await
            }
            ResumeEvent::Followup => {
                if execution.status != ExecutionStatus::AwaitingFollowup {
                    debug!(
                        "Follow-up hand-off found status {}, discarding",
                        execution.status.as_str()
                    );
                    return Ok(TurnOutcome::Superseded);
                }
                let moved = self
                    .transition(
                        &execution.execution_id,
                        ExecutionStatus::AwaitingFollowup,
                        &payload.turn_id,
                        ExecutionStatus::Processing,
                        &payload.turn_id,
                        execution.cycle_count,
                    )
                    .await?;
                if !moved {
                    return Ok(TurnOutcome::Superseded);
                }
                self.notifier.status(&execution.execution_id, "processing");
                self.run_cycles(&execution.execution_id, &payload.turn_id, payload.chain_depth)
                    .await
            }
            ResumeEvent::Approval {
                ref action_id,
                decision,
            } => {
                self.resume_approval(&execution, action_id, decision, payload.chain_depth)
                    .await
            }
        }
    }

    /// The model-cycle loop. Entered with the execution already CASed to
    /// processing under `turn_id`; exits on finalize, suspension, failure
    /// or supersession.
    async fn run_cycles(
        &self,
        execution_id: &str,
        turn_id: &str,
        chain_depth: u32,
    ) -> Result<TurnOutcome> {
        loop {
            let Some(execution) = self.store.get_execution(execution_id).await? else {
                return Err(anyhow!("Execution {} disappeared mid-turn", execution_id));
            };
            if execution.current_turn_id != turn_id
                || execution.status != ExecutionStatus::Processing
            {
                return Ok(TurnOutcome::Superseded);
            }

            let cycle = execution.cycle_count + 1;
            if cycle > self.config.max_cycles {
                warn!(
                    "Turn {} hit the cycle ceiling ({})",
                    turn_id, self.config.max_cycles
                );
                return self
                    .fail_turn(
                        &execution,
                        turn_id,
                        CYCLE_LIMIT_REPLY,
                        serde_json::json!({
                            "reason": "cycle_limit",
                            "max_cycles": self.config.max_cycles,
                        }),
                    )
                    .await;
            }
            let moved = self
                .transition(
                    execution_id,
                    ExecutionStatus::Processing,
                    turn_id,
                    ExecutionStatus::Processing,
                    turn_id,
                    cycle,
                )
                .await?;
            if !moved {
                return Ok(TurnOutcome::Superseded);
            }
            debug!("Turn {} cycle {}/{}", turn_id, cycle, self.config.max_cycles);

            let history = self.store.list_messages(execution_id).await?;
            let messages = self.prompt.build(&execution, &history);
            let schemas = self.registry.tool_schemas();

            let outcome = match self
                .gateway
                .call(execution_id, turn_id, &messages, &schemas)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Each attempt is already in the decision log; only
                    // the sanitized summary reaches the user.
                    let Some(current) = self.store.get_execution(execution_id).await? else {
                        return Err(anyhow!("Execution {} disappeared mid-turn", execution_id));
                    };
                    return self
                        .fail_turn(
                            &current,
                            turn_id,
                            PROVIDER_FAILURE_REPLY,
                            serde_json::json!({
                                "reason": "gateway",
                                "error_kind": err.kind(),
                            }),
                        )
                        .await;
                }
            };

            let usage = outcome.reply.usage;
            match router::route(&outcome.reply) {
                RouteDecision::Finalize { content } => {
                    self.store
                        .append_message(
                            execution_id,
                            turn_id,
                            NewMessage::assistant(content.clone()).with_usage(
                                usage.input_tokens,
                                usage.output_tokens,
                                outcome.latency_ms,
                            ),
                        )
                        .await?;
                    self.store
                        .record_decision(
                            execution_id,
                            turn_id,
                            DecisionStep::Finalize,
                            &serde_json::json!({
                                "cycle": cycle,
                                "content_chars": content.len(),
                            }),
                            true,
                            outcome.latency_ms,
                        )
                        .await?;
                    let moved = self
                        .transition(
                            execution_id,
                            ExecutionStatus::Processing,
                            turn_id,
                            ExecutionStatus::Idle,
                            turn_id,
                            cycle,
                        )
                        .await?;
                    if !moved {
                        return Ok(TurnOutcome::Superseded);
                    }
                    self.notifier.content(execution_id, &content);
                    self.notifier.status(execution_id, "idle");
                    info!("Turn {} completed after {} cycle(s)", turn_id, cycle);
                    return Ok(TurnOutcome::Completed { reply: content });
                }
                RouteDecision::Dispatch { content, calls } => {
                    self.store
                        .append_message(
                            execution_id,
                            turn_id,
                            NewMessage::assistant_tool_calls(content.clone(), calls.clone())
                                .with_usage(
                                    usage.input_tokens,
                                    usage.output_tokens,
                                    outcome.latency_ms,
                                ),
                        )
                        .await?;
                    if let Some(text) = content
                        && !self.config.suppress_transient_output
                    {
                        self.notifier.content(execution_id, &text);
                    }

                    match self
                        .dispatch_batch(&execution, turn_id, &calls, chain_depth)
                        .await?
                    {
                        BatchResult::Continue => {
                            if self.config.inline_followup {
                                continue;
                            }
                            let moved = self
                                .transition(
                                    execution_id,
                                    ExecutionStatus::Processing,
                                    turn_id,
                                    ExecutionStatus::AwaitingFollowup,
                                    turn_id,
                                    cycle,
                                )
                                .await?;
                            if !moved {
                                return Ok(TurnOutcome::Superseded);
                            }
                            self.transport
                                .enqueue(HandoffPayload {
                                    execution_id: execution_id.to_string(),
                                    turn_id: turn_id.to_string(),
                                    cycle_count: cycle,
                                    chain_depth: chain_depth + 1,
                                    event: ResumeEvent::Followup,
                                })
                                .await
                                .context("Queueing the follow-up cycle")?;
                            self.notifier.status(execution_id, "awaiting_followup");
                            return Ok(TurnOutcome::Suspended {
                                status: ExecutionStatus::AwaitingFollowup,
                            });
                        }
                        BatchResult::Suspend(status) => {
                            let moved = self
                                .transition(
                                    execution_id,
                                    ExecutionStatus::Processing,
                                    turn_id,
                                    status,
                                    turn_id,
                                    cycle,
                                )
                                .await?;
                            if !moved {
                                return Ok(TurnOutcome::Superseded);
                            }
                            self.notifier.status(execution_id, status.as_str());
                            return Ok(TurnOutcome::Suspended { status });
                        }
                        BatchResult::Halt { public, detail } => {
                            let Some(current) =
                                self.store.get_execution(execution_id).await?
                            else {
                                return Err(anyhow!(
                                    "Execution {} disappeared mid-turn",
                                    execution_id
                                ));
                            };
                            return self.fail_turn(&current, turn_id, &public, detail).await;
                        }
                    }
                }
            }
        }
    }

    /// Executes one batch the model asked for. Inline calls run here and
    /// their results land in the transcript immediately; background and
    /// approval-gated calls are parked and the turn suspends.
    async fn dispatch_batch(
        &self,
        execution: &Execution,
        turn_id: &str,
        calls: &[ToolCall],
        chain_depth: u32,
    ) -> Result<BatchResult> {
        let execution_id = &execution.execution_id;
        let plan = router::plan_batch(&self.registry, calls);
        self.record_batch(execution_id, turn_id, &plan).await?;

        for call in &plan.unknown {
            warn!("Model requested unregistered capability '{}'", call.name);
            let outcome =
                ActionOutcome::failure("unknown_capability", format!("no capability named '{}'", call.name));
            self.append_tool_result(execution_id, turn_id, &call.id, &call.name, &outcome, 0)
                .await?;
        }

        let mut halt: Option<(String, serde_json::Value)> = None;
        let inline_results = self
            .run_inline_batch(execution_id, turn_id, &plan.inline)
            .await;
        for (call, handler, outcome, duration_ms) in &inline_results {
            self.append_tool_result(
                execution_id,
                turn_id,
                &call.id,
                &call.name,
                outcome,
                *duration_ms,
            )
            .await?;
            if !outcome.is_success()
                && handler.spec().failure_policy == FailurePolicy::HaltAndReport
                && halt.is_none()
            {
                halt = Some((
                    format!("The '{}' step failed, so I stopped here.", call.name),
                    serde_json::json!({
                        "reason": "capability_halt",
                        "capability": call.name,
                        "tool_call_id": call.id,
                    }),
                ));
            }
        }
        if let Some((public, detail)) = halt {
            // Unstarted calls still get answers so transcript replay
            // never sees a dangling tool call.
            for (call, _) in plan.background.iter().chain(plan.approval.iter()) {
                let cancelled = ActionOutcome::failure("cancelled", "turn halted before this ran");
                self.append_tool_result(execution_id, turn_id, &call.id, &call.name, &cancelled, 0)
                    .await?;
            }
            return Ok(BatchResult::Halt { public, detail });
        }

        for (call, _handler) in &plan.background {
            let action = self
                .store
                .insert_pending_action(execution_id, turn_id, call, ActionStatus::Approved)
                .await?;
            self.transport.publish(HandoffPayload {
                execution_id: execution_id.clone(),
                turn_id: turn_id.to_string(),
                cycle_count: execution.cycle_count,
                chain_depth,
                event: ResumeEvent::ActionReady {
                    action_id: action.action_id,
                },
            })?;
        }

        for (call, _handler) in &plan.approval {
            let action = self
                .store
                .insert_pending_action(execution_id, turn_id, call, ActionStatus::Queued)
                .await?;
            self.store
                .record_decision(
                    execution_id,
                    turn_id,
                    DecisionStep::ApprovalRequested,
                    &serde_json::json!({
                        "action_id": action.action_id,
                        "capability": action.capability,
                    }),
                    true,
                    0,
                )
                .await?;
            self.approval
                .submit(&action, &self.config.approvers)
                .await
                .context("Submitting the approval request")?;
        }

        if !plan.approval.is_empty() {
            Ok(BatchResult::Suspend(ExecutionStatus::AwaitingApproval))
        } else if !plan.background.is_empty() {
            Ok(BatchResult::Suspend(ExecutionStatus::AwaitingAction))
        } else {
            Ok(BatchResult::Continue)
        }
    }

    /// Runs the inline portion of a batch, sequentially or concurrently
    /// per configuration. Results always come back in call order so the
    /// transcript stays deterministic.
    async fn run_inline_batch(
        &self,
        execution_id: &str,
        turn_id: &str,
        inline: &[(ToolCall, Arc<dyn CapabilityHandler>)],
    ) -> Vec<(ToolCall, Arc<dyn CapabilityHandler>, ActionOutcome, u64)> {
        if inline.is_empty() {
            return Vec::new();
        }
        if !self.config.parallel_tool_batch || inline.len() == 1 {
            let mut results = Vec::with_capacity(inline.len());
            for (call, handler) in inline {
                let ctx = ActionContext {
                    execution_id: execution_id.to_string(),
                    turn_id: turn_id.to_string(),
                    tool_call_id: call.id.clone(),
                };
                let started = Instant::now();
                let outcome = run_capability(handler, &call.arguments, &ctx).await;
                results.push((
                    call.clone(),
                    handler.clone(),
                    outcome,
                    started.elapsed().as_millis() as u64,
                ));
            }
            return results;
        }

        let mut set = JoinSet::new();
        for (index, (call, handler)) in inline.iter().enumerate() {
            let call = call.clone();
            let handler = handler.clone();
            let ctx = ActionContext {
                execution_id: execution_id.to_string(),
                turn_id: turn_id.to_string(),
                tool_call_id: call.id.clone(),
            };
            set.spawn(async move {
                let started = Instant::now();
                let outcome = run_capability(&handler, &call.arguments, &ctx).await;
                (index, call, handler, outcome, started.elapsed().as_millis() as u64)
            });
        }
        let mut indexed = Vec::with_capacity(inline.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => indexed.push(result),
                Err(e) => warn!("Inline capability task panicked: {}", e),
            }
        }
        indexed.sort_by_key(|(index, ..)| *index);
        indexed
            .into_iter()
            .map(|(_, call, handler, outcome, ms)| (call, handler, outcome, ms))
            .collect()
    }

    /// Executes a parked action delivered by the at-least-once transport.
    /// The resumption claims the execution row before touching the
    /// handler, so a user message arriving mid-handler sees a busy
    /// execution instead of silently superseding work that then commits
    /// writes under the old turn. Redeliveries of an already-resolved
    /// action settle without side effects.
    async fn resume_action(
        &self,
        execution: &Execution,
        action_id: &str,
        chain_depth: u32,
    ) -> Result<TurnOutcome> {
        if !execution.status.is_suspended() {
            debug!(
                "Action hand-off found status {}, discarding",
                execution.status.as_str()
            );
            return Ok(TurnOutcome::Superseded);
        }
        let execution_id = &execution.execution_id;
        let Some(action) = self.store.get_pending_action(action_id).await? else {
            warn!("Hand-off for unknown action {}", action_id);
            return Ok(TurnOutcome::Superseded);
        };
        if action.turn_id != execution.current_turn_id {
            return Ok(TurnOutcome::Superseded);
        }
        if action.status.is_terminal() {
            debug!("Action {} already resolved, duplicate delivery", action_id);
            return self
                .settle_after_action(execution_id, &action.turn_id, chain_depth)
                .await;
        }

        let claimed = self
            .transition(
                execution_id,
                execution.status,
                &action.turn_id,
                ExecutionStatus::Processing,
                &action.turn_id,
                execution.cycle_count,
            )
            .await?;
        if !claimed {
            let Some(current) = self.store.get_execution(execution_id).await? else {
                return Ok(TurnOutcome::Superseded);
            };
            if current.current_turn_id == action.turn_id {
                // A sibling resumption of the same turn holds the row.
                // Put the delivery back on the wire so this action still
                // runs once the row frees up.
                tokio::time::sleep(REDELIVERY_DELAY).await;
                self.transport.publish(HandoffPayload {
                    execution_id: execution_id.clone(),
                    turn_id: action.turn_id.clone(),
                    cycle_count: current.cycle_count,
                    chain_depth,
                    event: ResumeEvent::ActionReady {
                        action_id: action_id.to_string(),
                    },
                })?;
            }
            return Ok(TurnOutcome::Superseded);
        }

        let Some(handler) = self.registry.resolve(&action.capability) else {
            // Registered at dispatch time but gone now; configuration
            // changed underneath a live turn.
            let _ = self
                .store
                .advance_action(action_id, &[ActionStatus::Approved], ActionStatus::Failed)
                .await?;
            let outcome =
                ActionOutcome::failure("unknown_capability", format!("no capability named '{}'", action.capability));
            self.append_tool_result(
                execution_id,
                &action.turn_id,
                &action.tool_call_id,
                &action.capability,
                &outcome,
                0,
            )
            .await?;
            return self
                .park_or_continue(execution_id, &action.turn_id, chain_depth)
                .await;
        };

        let ctx = ActionContext {
            execution_id: execution_id.clone(),
            turn_id: action.turn_id.clone(),
            tool_call_id: action.tool_call_id.clone(),
        };
        let started = Instant::now();
        let outcome = run_capability(&handler, &action.arguments, &ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let to = if outcome.is_success() {
            ActionStatus::Executed
        } else {
            ActionStatus::Failed
        };
        let won = self
            .store
            .advance_action(action_id, &[ActionStatus::Approved], to)
            .await?;
        if !won {
            debug!(
                "Action {} resolved concurrently, discarding this result",
                action_id
            );
            return self
                .park_or_continue(execution_id, &action.turn_id, chain_depth)
                .await;
        }

        self.append_tool_result(
            execution_id,
            &action.turn_id,
            &action.tool_call_id,
            &action.capability,
            &outcome,
            duration_ms,
        )
        .await?;

        if !outcome.is_success()
            && handler.spec().failure_policy == FailurePolicy::HaltAndReport
        {
            let Some(current) = self.store.get_execution(execution_id).await? else {
                return Err(anyhow!("Execution {} disappeared mid-turn", execution_id));
            };
            return self
                .fail_turn(
                    &current,
                    &action.turn_id,
                    &format!("The '{}' step failed, so I stopped here.", action.capability),
                    serde_json::json!({
                        "reason": "capability_halt",
                        "capability": action.capability,
                        "action_id": action_id,
                    }),
                )
                .await;
        }

        self.park_or_continue(execution_id, &action.turn_id, chain_depth)
            .await
    }

    /// Applies a human decision to a queued action. Approval runs the
    /// handler per its execution mode; rejection becomes a failed tool
    /// result the model sees on the follow-up cycle.
    async fn resume_approval(
        &self,
        execution: &Execution,
        action_id: &str,
        decision: ApprovalDecision,
        chain_depth: u32,
    ) -> Result<TurnOutcome> {
        if execution.status != ExecutionStatus::AwaitingApproval {
            debug!(
                "Approval decision found status {}, discarding",
                execution.status.as_str()
            );
            return Ok(TurnOutcome::Superseded);
        }
        let execution_id = &execution.execution_id;
        let Some(action) = self.store.get_pending_action(action_id).await? else {
            return Err(anyhow!("No pending action {}", action_id));
        };
        if action.turn_id != execution.current_turn_id {
            return Ok(TurnOutcome::Superseded);
        }
        if action.status.is_terminal() {
            debug!("Approval decision for already-resolved action {}", action_id);
            return self
                .settle_after_action(execution_id, &action.turn_id, chain_depth)
                .await;
        }

        match decision {
            ApprovalDecision::Rejected => {
                let won = self
                    .store
                    .advance_action(action_id, &[ActionStatus::Queued], ActionStatus::Rejected)
                    .await?;
                if won {
                    self.record_approval_resolved(execution_id, &action, decision)
                        .await?;
                    let outcome = ActionOutcome::failure(
                        "rejected",
                        "an operator declined this action",
                    );
                    self.append_tool_result(
                        execution_id,
                        &action.turn_id,
                        &action.tool_call_id,
                        &action.capability,
                        &outcome,
                        0,
                    )
                    .await?;
                }
                self.settle_after_action(execution_id, &action.turn_id, chain_depth)
                    .await
            }
            ApprovalDecision::Approved => {
                let won = self
                    .store
                    .advance_action(action_id, &[ActionStatus::Queued], ActionStatus::Approved)
                    .await?;
                if !won {
                    return self
                        .settle_after_action(execution_id, &action.turn_id, chain_depth)
                        .await;
                }
                self.record_approval_resolved(execution_id, &action, decision)
                    .await?;

                let background = self
                    .registry
                    .resolve(&action.capability)
                    .map(|h| h.spec().execution_mode == crate::core::dispatch::ExecutionMode::Background)
                    .unwrap_or(false);
                if background {
                    self.transport.publish(HandoffPayload {
                        execution_id: execution_id.clone(),
                        turn_id: action.turn_id.clone(),
                        cycle_count: execution.cycle_count,
                        chain_depth,
                        event: ResumeEvent::ActionReady {
                            action_id: action_id.to_string(),
                        },
                    })?;
                    self.settle_after_action(execution_id, &action.turn_id, chain_depth)
                        .await
                } else {
                    // Inline capability: run it right here in the resume.
                    self.resume_action(execution, action_id, chain_depth).await
                }
            }
        }
    }

    /// After any action resolves (or a duplicate is discarded), decides
    /// where the turn stands: still waiting on approvals, still waiting
    /// on parked work, or ready for the follow-up model cycle.
    async fn settle_after_action(
        &self,
        execution_id: &str,
        turn_id: &str,
        chain_depth: u32,
    ) -> Result<TurnOutcome> {
        let Some(execution) = self.store.get_execution(execution_id).await? else {
            return Err(anyhow!("Execution {} disappeared mid-turn", execution_id));
        };
        if execution.current_turn_id != turn_id {
            return Ok(TurnOutcome::Superseded);
        }
        if !execution.status.is_suspended() {
            // Another resumption already carried the turn forward.
            return Ok(TurnOutcome::Superseded);
        }

        let actions = self.store.list_turn_actions(execution_id, turn_id).await?;
        let queued = actions.iter().any(|a| a.status == ActionStatus::Queued);
        let in_flight = actions.iter().any(|a| a.status == ActionStatus::Approved);

        if queued {
            return Ok(TurnOutcome::Suspended {
                status: ExecutionStatus::AwaitingApproval,
            });
        }
        if in_flight {
            if execution.status == ExecutionStatus::AwaitingApproval {
                let _ = self
                    .transition(
                        execution_id,
                        ExecutionStatus::AwaitingApproval,
                        turn_id,
                        ExecutionStatus::AwaitingAction,
                        turn_id,
                        execution.cycle_count,
                    )
                    .await?;
                self.notifier.status(execution_id, "awaiting_action");
            }
            return Ok(TurnOutcome::Suspended {
                status: ExecutionStatus::AwaitingAction,
            });
        }

        let moved = self
            .transition(
                execution_id,
                execution.status,
                turn_id,
                ExecutionStatus::Processing,
                turn_id,
                execution.cycle_count,
            )
            .await?;
        if !moved {
            return Ok(TurnOutcome::Superseded);
        }
        self.notifier.status(execution_id, "processing");
        self.run_cycles(execution_id, turn_id, chain_depth).await
    }

    /// Counterpart of `settle_after_action` for a resumption that holds
    /// the processing claim: parks the turn again while approvals or
    /// background work remain, otherwise rolls straight into the
    /// follow-up model cycle.
    async fn park_or_continue(
        &self,
        execution_id: &str,
        turn_id: &str,
        chain_depth: u32,
    ) -> Result<TurnOutcome> {
        let Some(execution) = self.store.get_execution(execution_id).await? else {
            return Err(anyhow!("Execution {} disappeared mid-turn", execution_id));
        };
        if execution.current_turn_id != turn_id
            || execution.status != ExecutionStatus::Processing
        {
            return Ok(TurnOutcome::Superseded);
        }

        let actions = self.store.list_turn_actions(execution_id, turn_id).await?;
        let queued = actions.iter().any(|a| a.status == ActionStatus::Queued);
        let in_flight = actions.iter().any(|a| a.status == ActionStatus::Approved);

        let parked = if queued {
            Some(ExecutionStatus::AwaitingApproval)
        } else if in_flight {
            Some(ExecutionStatus::AwaitingAction)
        } else {
            None
        };
        if let Some(status) = parked {
            let moved = self
                .transition(
                    execution_id,
                    ExecutionStatus::Processing,
                    turn_id,
                    status,
                    turn_id,
                    execution.cycle_count,
                )
                .await?;
            if !moved {
                return Ok(TurnOutcome::Superseded);
            }
            self.notifier.status(execution_id, status.as_str());
            return Ok(TurnOutcome::Suspended { status });
        }

        self.run_cycles(execution_id, turn_id, chain_depth).await
    }

    async fn append_tool_result(
        &self,
        execution_id: &str,
        turn_id: &str,
        tool_call_id: &str,
        capability: &str,
        outcome: &ActionOutcome,
        duration_ms: u64,
    ) -> Result<()> {
        self.store
            .append_message(
                execution_id,
                turn_id,
                NewMessage::tool_result(tool_call_id, outcome.as_tool_content()),
            )
            .await?;
        self.store
            .record_decision(
                execution_id,
                turn_id,
                DecisionStep::ToolResult,
                &serde_json::json!({
                    "capability": capability,
                    "tool_call_id": tool_call_id,
                    "outcome": outcome,
                }),
                outcome.is_success(),
                duration_ms,
            )
            .await?;
        Ok(())
    }

    async fn record_batch(
        &self,
        execution_id: &str,
        turn_id: &str,
        plan: &BatchPlan,
    ) -> Result<()> {
        let describe = |group: &[(ToolCall, Arc<dyn CapabilityHandler>)]| {
            group.iter().map(|(c, _)| c.name.clone()).collect::<Vec<_>>()
        };
        self.store
            .record_decision(
                execution_id,
                turn_id,
                DecisionStep::ToolCall,
                &serde_json::json!({
                    "inline": describe(&plan.inline),
                    "background": describe(&plan.background),
                    "approval": describe(&plan.approval),
                    "unknown": plan.unknown.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                }),
                plan.unknown.is_empty(),
                0,
            )
            .await?;
        Ok(())
    }

    async fn record_approval_resolved(
        &self,
        execution_id: &str,
        action: &PendingAction,
        decision: ApprovalDecision,
    ) -> Result<()> {
        self.store
            .record_decision(
                execution_id,
                &action.turn_id,
                DecisionStep::ApprovalResolved,
                &serde_json::json!({
                    "action_id": action.action_id,
                    "capability": action.capability,
                    "decision": decision.as_str(),
                }),
                decision == ApprovalDecision::Approved,
                0,
            )
            .await?;
        self.notifier.publish(
            execution_id,
            serde_json::json!({
                "type": "approval_resolved",
                "action_id": action.action_id,
                "decision": decision.as_str(),
            }),
        );
        Ok(())
    }

    /// Terminal failure path. The sanitized explanation is all the user
    /// sees; the detail goes to the decision log.
    async fn fail_turn(
        &self,
        execution: &Execution,
        turn_id: &str,
        public: &str,
        detail: serde_json::Value,
    ) -> Result<TurnOutcome> {
        let execution_id = &execution.execution_id;
        self.store
            .record_decision(execution_id, turn_id, DecisionStep::Error, &detail, false, 0)
            .await?;
        self.store
            .append_message(execution_id, turn_id, NewMessage::assistant(public))
            .await?;
        let _ = self
            .transition(
                execution_id,
                execution.status,
                turn_id,
                ExecutionStatus::Failed,
                turn_id,
                execution.cycle_count,
            )
            .await?;
        self.notifier.content(execution_id, public);
        self.notifier.status(execution_id, "failed");
        Ok(TurnOutcome::Failed {
            message: public.to_string(),
        })
    }
}

enum BatchResult {
    /// Every call resolved inline; the turn can run its follow-up cycle.
    Continue,
    /// Work was parked; the turn suspends in this status.
    Suspend(ExecutionStatus),
    /// A halt-and-report capability failed; the turn must end now.
    Halt {
        public: String,
        detail: serde_json::Value,
    },
}
