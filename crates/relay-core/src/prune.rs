// Context pruner
//
// Between tool rounds the history grows fast; the pruner rewrites historical
// tool results and reasoning down to a window of the N most recent cycles.
// A tool cycle is an assistant message with a non-empty toolCalls list plus
// the immediately following tool messages answering those calls. Orphaned
// tool messages (no matching call) are never assigned to a cycle and are
// left untouched. System and user messages are never rewritten.

use serde_json::json;

use crate::message::{ContentPart, Message, Role};
use crate::settings::PreservePolicy;

/// Placeholder text written into redacted tool messages
pub const REDACTED_PLACEHOLDER: &str = "[Tool result redacted to conserve context]";

/// Machine-readable reason carried in the redaction tool_result part
pub const REDACTED_REASON: &str = "tool_result_redacted";

/// One identified tool cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCycle {
    /// Index of the assistant message carrying the calls
    pub assistant: usize,
    /// Indices of the tool messages answering them, in order
    pub tools: Vec<usize>,
}

/// Identify tool cycles in message order
pub fn find_tool_cycles(messages: &[Message]) -> Vec<ToolCycle> {
    let mut cycles = Vec::new();

    for (idx, msg) in messages.iter().enumerate() {
        if msg.role != Role::Assistant || !msg.has_tool_calls() {
            continue;
        }
        let call_ids: Vec<&str> = msg
            .tool_calls
            .as_ref()
            .map(|calls| calls.iter().map(|c| c.id.as_str()).collect())
            .unwrap_or_default();

        let mut tools = Vec::new();
        for (offset, follower) in messages[idx + 1..].iter().enumerate() {
            if follower.role != Role::Tool {
                break;
            }
            let matches = follower
                .tool_call_id
                .as_deref()
                .is_some_and(|id| call_ids.contains(&id));
            if matches {
                tools.push(idx + 1 + offset);
            }
            // Non-matching tool messages are orphans; keep scanning the run
        }

        cycles.push(ToolCycle {
            assistant: idx,
            tools,
        });
    }

    cycles
}

/// True when the message already carries the redaction marker
fn is_redacted(msg: &Message) -> bool {
    msg.content.iter().any(|part| {
        matches!(
            part,
            ContentPart::ToolResult { result, .. }
                if result.get("redacted").and_then(|v| v.as_bool()) == Some(true)
        )
    })
}

/// Rewrite one tool message into its redacted form. Idempotent.
fn redact_tool_message(msg: &mut Message, tool_name: &str) {
    if is_redacted(msg) {
        return;
    }

    match msg.content.iter_mut().find_map(|part| match part {
        ContentPart::Text { text } => Some(text),
        _ => None,
    }) {
        Some(text) => *text = REDACTED_PLACEHOLDER.to_string(),
        None => msg
            .content
            .insert(0, ContentPart::text(REDACTED_PLACEHOLDER)),
    }

    let redaction = json!({"redacted": true, "reason": REDACTED_REASON});
    match msg.content.iter_mut().find_map(|part| match part {
        ContentPart::ToolResult { result, .. } => Some(result),
        _ => None,
    }) {
        Some(result) => *result = redaction,
        None => msg.content.push(ContentPart::ToolResult {
            tool_name: tool_name.to_string(),
            result: redaction,
            is_error: None,
        }),
    }
}

/// Redact the tool messages of all but the last N cycles.
pub fn prune_tool_results(messages: &mut [Message], policy: PreservePolicy) {
    let keep = match policy {
        PreservePolicy::All => return,
        PreservePolicy::None => 0,
        PreservePolicy::Last(n) => n as usize,
    };

    let cycles = find_tool_cycles(messages);
    let cutoff = cycles.len().saturating_sub(keep);

    for cycle in &cycles[..cutoff] {
        // Resolve original tool names from the assistant's calls so a
        // synthesized tool_result part stays attributable
        let names: Vec<(String, String)> = messages[cycle.assistant]
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| (c.id.clone(), c.name.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for &tool_idx in &cycle.tools {
            let name = messages[tool_idx]
                .tool_call_id
                .as_deref()
                .and_then(|id| names.iter().find(|(cid, _)| cid == id))
                .map(|(_, name)| name.clone())
                .unwrap_or_default();
            redact_tool_message(&mut messages[tool_idx], &name);
        }
    }
}

/// Mark reasoning as redacted on all but the last N reasoning-bearing
/// assistant messages. The text is kept (signed reasoning must survive for
/// providers that require re-send); only the flag flips.
pub fn prune_reasoning(messages: &mut [Message], policy: PreservePolicy) {
    let keep = match policy {
        PreservePolicy::All => return,
        PreservePolicy::None => 0,
        PreservePolicy::Last(n) => n as usize,
    };

    let bearing: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Assistant && m.reasoning.is_some())
        .map(|(i, _)| i)
        .collect();

    let cutoff = bearing.len().saturating_sub(keep);
    for &idx in &bearing[..cutoff] {
        if let Some(reasoning) = messages[idx].reasoning.as_mut() {
            reasoning.redacted = true;
        }
    }
}
