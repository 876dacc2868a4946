#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Processing,
    AwaitingAction,
    AwaitingFollowup,
    AwaitingApproval,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::AwaitingAction => "awaiting_action",
            ExecutionStatus::AwaitingFollowup => "awaiting_followup",
            ExecutionStatus::AwaitingApproval => "awaiting_approval",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(ExecutionStatus::Idle),
            "processing" => Some(ExecutionStatus::Processing),
            "awaiting_action" => Some(ExecutionStatus::AwaitingAction),
            "awaiting_followup" => Some(ExecutionStatus::AwaitingFollowup),
            "awaiting_approval" => Some(ExecutionStatus::AwaitingApproval),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    /// States that represent a suspended turn waiting on an external event.
    pub fn is_suspended(self) -> bool {
        matches!(
            self,
            ExecutionStatus::AwaitingAction
                | ExecutionStatus::AwaitingFollowup
                | ExecutionStatus::AwaitingApproval
        )
    }
}

/// One persisted agent session. `current_turn_id` changes only when a new
/// user message opens a turn; every mutation goes through the store's
/// compare-and-set so a late writer can never clobber a newer turn.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Execution {
    pub execution_id: String,
    pub owner: String,
    pub agent_profile: String,
    pub status: ExecutionStatus,
    pub current_turn_id: String,
    pub cycle_count: u32,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A single structured tool invocation requested by the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Append-only conversation row. Immutable once persisted; strict insert
/// order defines the transcript.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub execution_id: String,
    pub turn_id: String,
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on `tool` rows: the originating call this result answers.
    pub tool_call_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub created_at: String,
}

/// New message to append; the store assigns id and created_at.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::User),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Assistant),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Some(Role::Assistant),
            content,
            tool_calls: Some(calls),
            ..Default::default()
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Tool),
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, latency_ms: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.latency_ms = latency_ms;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Queued => "queued",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Executed => "executed",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(ActionStatus::Queued),
            "approved" => Some(ActionStatus::Approved),
            "rejected" => Some(ActionStatus::Rejected),
            "executed" => Some(ActionStatus::Executed),
            "failed" => Some(ActionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Rejected | ActionStatus::Executed | ActionStatus::Failed
        )
    }
}

/// A capability invocation parked for background execution or approval.
/// Tied to the turn that created it: if that turn is superseded the row
/// is discarded without side effects.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingAction {
    pub action_id: String,
    pub execution_id: String,
    pub turn_id: String,
    pub capability: String,
    pub arguments: serde_json::Value,
    pub tool_call_id: String,
    pub status: ActionStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStep {
    LlmCall,
    ToolCall,
    ToolResult,
    Error,
    ApprovalRequested,
    ApprovalResolved,
    Finalize,
}

impl DecisionStep {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStep::LlmCall => "llm_call",
            DecisionStep::ToolCall => "tool_call",
            DecisionStep::ToolResult => "tool_result",
            DecisionStep::Error => "error",
            DecisionStep::ApprovalRequested => "approval_requested",
            DecisionStep::ApprovalResolved => "approval_resolved",
            DecisionStep::Finalize => "finalize",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "llm_call" => Some(DecisionStep::LlmCall),
            "tool_call" => Some(DecisionStep::ToolCall),
            "tool_result" => Some(DecisionStep::ToolResult),
            "error" => Some(DecisionStep::Error),
            "approval_requested" => Some(DecisionStep::ApprovalRequested),
            "approval_resolved" => Some(DecisionStep::ApprovalResolved),
            "finalize" => Some(DecisionStep::Finalize),
            _ => None,
        }
    }
}

/// Append-only audit row. The orchestrator writes these before acting on
/// any step outcome; nothing ever mutates or deletes them.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DecisionLogEntry {
    pub id: i64,
    pub execution_id: String,
    pub turn_id: String,
    pub step: DecisionStep,
    pub payload: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    pub created_at: String,
}
