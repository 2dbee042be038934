use parley_core::config::DEFAULT_CONTEXT_TOKENS;

use crate::types::{Conversation, Direction, Message, MessageType};

/// How many trailing messages survive truncation verbatim.
const TAIL_LEN: usize = 15;
/// Snippet cap inside the summary line.
const SNIPPET_CHARS: usize = 80;
const MAX_INBOUND_SNIPPETS: usize = 5;
const MAX_OUTBOUND_SNIPPETS: usize = 3;

/// A bounded view over a conversation's history.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub messages: Vec<Message>,
    pub truncated: bool,
    pub estimated_tokens: usize,
}

/// Estimate tokens as ceil(total characters / 4). Deliberately crude — the
/// budget only needs to keep prompts bounded, not billed.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    chars.div_ceil(4)
}

/// Bound the conversation history by a token budget.
///
/// Under budget, all messages pass through verbatim. Over budget, the window
/// keeps the very first message, replaces the middle with one deterministic
/// summary message, and keeps the last [`TAIL_LEN`] messages. No LLM call is
/// involved.
pub fn build_window(conversation: &Conversation, max_tokens: Option<usize>) -> ContextWindow {
    let budget = max_tokens.unwrap_or(DEFAULT_CONTEXT_TOKENS);
    let messages = &conversation.messages;
    let full_estimate = estimate_tokens(messages);

    // Nothing to fold: within budget, or too short to have a middle.
    if full_estimate <= budget || messages.len() <= TAIL_LEN + 1 {
        return ContextWindow {
            messages: messages.clone(),
            truncated: false,
            estimated_tokens: full_estimate,
        };
    }

    let first = messages[0].clone();
    let tail_start = messages.len() - TAIL_LEN;
    let middle = &messages[1..tail_start];
    let tail = messages[tail_start..].to_vec();

    let summary = summarize(conversation, middle);

    let mut window = Vec::with_capacity(TAIL_LEN + 2);
    window.push(first);
    window.push(summary);
    window.extend(tail);

    let estimated_tokens = estimate_tokens(&window);
    ContextWindow {
        messages: window,
        truncated: true,
        estimated_tokens,
    }
}

/// Render the folded middle as a single system message.
fn summarize(conversation: &Conversation, middle: &[Message]) -> Message {
    let inbound_snippets: Vec<String> = middle
        .iter()
        .filter(|m| m.direction == Direction::Inbound)
        .take(MAX_INBOUND_SNIPPETS)
        .map(|m| snippet(&m.content))
        .collect();
    let outbound_snippets: Vec<String> = middle
        .iter()
        .filter(|m| m.direction == Direction::Outbound)
        .take(MAX_OUTBOUND_SNIPPETS)
        .map(|m| snippet(&m.content))
        .collect();

    let mut content = format!("[Summary of {} earlier messages]", middle.len());
    if !inbound_snippets.is_empty() {
        content.push_str(" Customer discussed: ");
        content.push_str(&inbound_snippets.join("; "));
    }
    if !outbound_snippets.is_empty() {
        content.push_str("; Agent responded about: ");
        content.push_str(&outbound_snippets.join("; "));
    }

    let mut message = Message::new(
        &conversation.id,
        &conversation.contact_id,
        Direction::Outbound,
        content,
        conversation.channel,
    )
    .with_type(MessageType::System);
    // Anchor the summary where the folded span began so timestamps stay
    // non-decreasing across the window.
    if let Some(first_middle) = middle.first() {
        message.timestamp = first_middle.timestamp;
    }
    message
}

fn snippet(content: &str) -> String {
    if content.chars().count() <= SNIPPET_CHARS {
        content.to_string()
    } else {
        content.chars().take(SNIPPET_CHARS).collect()
    }
}
