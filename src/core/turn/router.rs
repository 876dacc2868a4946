//! Classifies a raw model reply into the coordinator's next move and
//! splits a tool-call batch by how each call must run.

use std::sync::Arc;

use crate::core::dispatch::{CapabilityHandler, CapabilityRegistry, ExecutionMode};
use crate::core::gateway::ModelReply;
use crate::core::types::ToolCall;

/// Mutually exclusive interpretation of one model reply. Tool calls win:
/// a reply carrying both text and calls is a dispatch whose text is
/// transient commentary, not the final answer.
#[derive(Debug)]
pub enum RouteDecision {
    Finalize { content: String },
    Dispatch { content: Option<String>, calls: Vec<ToolCall> },
}

pub fn route(reply: &ModelReply) -> RouteDecision {
    if reply.tool_calls.is_empty() {
        RouteDecision::Finalize {
            content: reply.content.clone().unwrap_or_default(),
        }
    } else {
        RouteDecision::Dispatch {
            content: reply
                .content
                .clone()
                .filter(|c| !c.trim().is_empty()),
            calls: reply.tool_calls.clone(),
        }
    }
}

/// One batch of tool calls grouped by execution path. Within each group
/// the model's original call order is preserved.
pub struct BatchPlan {
    /// Runs in the current unit of work, result appended immediately.
    pub inline: Vec<(ToolCall, Arc<dyn CapabilityHandler>)>,
    /// Parked as a pending action and handed off.
    pub background: Vec<(ToolCall, Arc<dyn CapabilityHandler>)>,
    /// Parked awaiting a human decision before anything runs.
    pub approval: Vec<(ToolCall, Arc<dyn CapabilityHandler>)>,
    /// Names the registry does not know; each gets a synthetic failed
    /// tool result so the transcript stays coherent.
    pub unknown: Vec<ToolCall>,
}

impl BatchPlan {
    pub fn is_fully_inline(&self) -> bool {
        self.background.is_empty() && self.approval.is_empty()
    }
}

pub fn plan_batch(registry: &CapabilityRegistry, calls: &[ToolCall]) -> BatchPlan {
    let mut plan = BatchPlan {
        inline: Vec::new(),
        background: Vec::new(),
        approval: Vec::new(),
        unknown: Vec::new(),
    };
    for call in calls {
        match registry.resolve(&call.name) {
            None => plan.unknown.push(call.clone()),
            Some(handler) => {
                let spec = handler.spec();
                if spec.requires_approval {
                    plan.approval.push((call.clone(), handler));
                } else if spec.execution_mode == ExecutionMode::Background {
                    plan.background.push((call.clone(), handler));
                } else {
                    plan.inline.push((call.clone(), handler));
                }
            }
        }
    }
    plan
}
