use crate::core::gateway::ChatMessage;
use crate::core::types::{Execution, MessageRecord, Role};

/// Builds the message list for one model call. Opaque to the coordinator:
/// it only requires an ordered list of role/content entries back.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, execution: &Execution, history: &[MessageRecord]) -> Vec<ChatMessage>;
}

/// Default builder: a fixed system prompt plus a bounded replay of the
/// persisted transcript, preserving structured tool calls and results so
/// follow-up cycles see what already happened.
pub struct TranscriptPromptBuilder {
    system_prompt: String,
    max_history: usize,
}

impl TranscriptPromptBuilder {
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_history,
        }
    }
}

impl PromptBuilder for TranscriptPromptBuilder {
    fn build(&self, _execution: &Execution, history: &[MessageRecord]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));

        let mut start = history.len().saturating_sub(self.max_history);
        // A window cut can strand tool results whose call row fell
        // outside it; drop those leading orphans.
        while history
            .get(start)
            .map(|r| r.role == Role::Tool)
            .unwrap_or(false)
        {
            start += 1;
        }

        // Call ids still waiting for a result row. A superseded or halted
        // turn can leave these unanswered in the transcript; strict
        // providers reject a call with no result, so synthesize one.
        let mut open_calls: Vec<String> = Vec::new();
        let flush_open = |messages: &mut Vec<ChatMessage>, open: &mut Vec<String>| {
            for call_id in open.drain(..) {
                messages.push(ChatMessage::tool(
                    call_id,
                    "{\"error\":\"unresolved\",\"message\":\"this step never completed\"}",
                ));
            }
        };

        for record in &history[start..] {
            match record.role {
                Role::User => {
                    flush_open(&mut messages, &mut open_calls);
                    messages.push(ChatMessage::user(record.content.clone().unwrap_or_default()));
                }
                Role::Assistant => {
                    flush_open(&mut messages, &mut open_calls);
                    if let Some(calls) = &record.tool_calls {
                        open_calls.extend(calls.iter().map(|c| c.id.clone()));
                    }
                    messages.push(ChatMessage::assistant(
                        record.content.clone(),
                        record.tool_calls.clone(),
                    ));
                }
                Role::Tool => {
                    let call_id = record.tool_call_id.clone().unwrap_or_default();
                    open_calls.retain(|id| id != &call_id);
                    messages.push(ChatMessage::tool(
                        call_id,
                        record.content.clone().unwrap_or_default(),
                    ));
                }
            }
        }
        flush_open(&mut messages, &mut open_calls);
        messages
    }
}
