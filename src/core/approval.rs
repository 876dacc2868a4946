use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::core::notify::Notifier;
use crate::core::types::PendingAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
        }
    }
}

/// External approval-workflow collaborator. `submit` hands the parked
/// action to whatever system collects human sign-off; the decision comes
/// back later through the HITL resume endpoint, never through this trait.
#[async_trait]
pub trait ApprovalWorkflow: Send + Sync {
    async fn submit(&self, action: &PendingAction, approvers: &[String]) -> Result<String>;
}

/// Default workflow: surfaces the request on the notification channel and
/// leaves the decision to an operator hitting the HITL endpoint.
pub struct NotifyApprovalWorkflow {
    notifier: Notifier,
}

impl NotifyApprovalWorkflow {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ApprovalWorkflow for NotifyApprovalWorkflow {
    async fn submit(&self, action: &PendingAction, approvers: &[String]) -> Result<String> {
        info!(
            "Approval requested for capability '{}' (action {})",
            action.capability, action.action_id
        );
        self.notifier.publish(
            &action.execution_id,
            serde_json::json!({
                "type": "approval_requested",
                "action_id": action.action_id,
                "capability": action.capability,
                "arguments": action.arguments,
                "approvers": approvers,
            }),
        );
        Ok(action.action_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionStatus;

    #[tokio::test]
    async fn submit_pushes_a_request_event() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();
        let workflow = NotifyApprovalWorkflow::new(notifier);

        let action = PendingAction {
            action_id: "act-1".to_string(),
            execution_id: "exec-1".to_string(),
            turn_id: "turn-1".to_string(),
            capability: "record_update".to_string(),
            arguments: serde_json::json!({"id": 9}),
            tool_call_id: "call_1".to_string(),
            status: ActionStatus::Queued,
            created_at: String::new(),
        };

        let handle = workflow.submit(&action, &["ops".to_string()]).await.unwrap();
        assert_eq!(handle, "act-1");

        let raw = rx.recv().await.unwrap();
        let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(event["type"], "approval_requested");
        assert_eq!(event["capability"], "record_update");
    }
}
