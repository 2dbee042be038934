use parley_contacts::Contact;
use parley_conversations::{Conversation, Direction, Message};
use parley_core::config::MAX_PROMPT_CHARS;
use parley_knowledge::KnowledgeIndex;

use crate::llm::{ChatMessage, ChatRole};
use crate::personas::PersonaConfig;
use crate::sales;

/// History depth for the router's classification context.
const ROUTER_HISTORY: usize = 5;
/// History depth for persona turns.
const PERSONA_HISTORY: usize = 20;

/// A system prompt plus the chat history to send with it.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub system: String,
    pub history: Vec<ChatMessage>,
}

const DEFAULT_ROUTER_INSTRUCTION: &str = "You route inbound customer messages to the right \
assistant. Classify the CURRENT message and reply with ONLY a JSON object of the form \
{\"intent\": \"sales|support|other\", \"confidence\": 0.0-1.0, \"language\": \"ISO 639-1\", \
\"sentiment\": \"positive|neutral|negative\", \"summary\": \"one sentence\"}. No prose.";

/// Build the router classification prompt: instruction + the last five
/// messages as context + the current inbound as the final user turn.
pub fn build_router_prompt(
    knowledge: &KnowledgeIndex,
    conversation: &Conversation,
    current: &Message,
) -> BuiltPrompt {
    let system = knowledge
        .get("config", "router-instructions")
        .and_then(|doc| {
            doc.data
                .get("instruction")
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| DEFAULT_ROUTER_INSTRUCTION.to_string());

    let mut history = map_history(&conversation.messages, ROUTER_HISTORY);
    push_current(&mut history, current);

    BuiltPrompt { system, history }
}

/// Build a persona turn prompt.
///
/// The persona's system prompt gets `{companyName}` / `{channel}` /
/// `{contactName}` substituted, then tone-of-voice, the knowledge base
/// (dropping any block that would push the prompt past the character cap),
/// FAQ matches, customer info, and conversation context are appended.
pub fn build_persona_prompt(
    persona: &PersonaConfig,
    message: &Message,
    conversation: &Conversation,
    contact: &Contact,
    knowledge: &KnowledgeIndex,
) -> BuiltPrompt {
    let company_name = knowledge
        .get("company", "profile")
        .and_then(|doc| {
            doc.data
                .get("name")
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| "our company".to_string());
    let contact_name = contact.name.clone().unwrap_or_else(|| "the customer".to_string());

    let mut system = persona
        .system_prompt
        .replace("{companyName}", &company_name)
        .replace("{channel}", conversation.channel.as_str())
        .replace("{contactName}", &contact_name);

    let mut relevant = knowledge.find_relevant_data(&message.content, &persona.key);
    let faq_matches = relevant.remove("faq-matches");

    if let Some(tone) = relevant.remove("tone-of-voice") {
        system.push_str("\n\n## Tone of Voice\n");
        system.push_str(&render_block(&tone));
    }

    // Company info was already folded into the opening line via
    // {companyName}; the remaining blocks form the knowledge base section.
    relevant.remove("company-info");
    if !relevant.is_empty() {
        system.push_str("\n\n## Knowledge Base");
        for (name, block) in &relevant {
            let rendered = render_block(block);
            if system.len() + rendered.len() + name.len() + 8 > MAX_PROMPT_CHARS {
                continue;
            }
            system.push_str("\n\n### ");
            system.push_str(name);
            system.push('\n');
            system.push_str(&rendered);
        }
    }

    if let Some(faqs) = faq_matches {
        system.push_str("\n\nRelevant FAQ Matches\n");
        system.push_str(&render_block(&faqs));
    }

    system.push_str("\n\n## Customer Info\n");
    system.push_str(&format!(
        "Name: {contact_name}\nChannel: {}\nTags: {}\n",
        conversation.channel,
        if contact.tags.is_empty() {
            "none".to_string()
        } else {
            contact.tags.join(", ")
        },
    ));

    system.push_str("\n## Conversation Context\n");
    let ctx = &conversation.context;
    system.push_str(&format!(
        "Intent: {}\nSentiment: {}\nLanguage: {}\n",
        ctx.intent.as_deref().unwrap_or("unknown"),
        ctx.sentiment.as_deref().unwrap_or("unknown"),
        ctx.language.as_deref().unwrap_or("unknown"),
    ));
    if let Some(score) = ctx.lead_score {
        system.push_str(&format!("Lead score: {score}\n"));
    }
    if persona.key == "sales" {
        system.push('\n');
        system.push_str(sales::determine_stage(conversation).guidance());
    }

    let mut history = map_history(&conversation.messages, PERSONA_HISTORY);
    push_current(&mut history, message);

    BuiltPrompt { system, history }
}

/// Map the last `limit` messages into chat roles: inbound → user,
/// everything else → assistant.
fn map_history(messages: &[Message], limit: usize) -> Vec<ChatMessage> {
    let start = messages.len().saturating_sub(limit);
    messages[start..]
        .iter()
        .map(|m| ChatMessage {
            role: if m.direction == Direction::Inbound {
                ChatRole::User
            } else {
                ChatRole::Assistant
            },
            content: m.content.clone(),
        })
        .collect()
}

/// Append the current inbound as the final user turn — unless the history
/// already ends with it (the engine appends before delegating).
fn push_current(history: &mut Vec<ChatMessage>, current: &Message) {
    let already_last = history
        .last()
        .map(|m| m.role == ChatRole::User && m.content == current.content)
        .unwrap_or(false);
    if !already_last {
        history.push(ChatMessage::user(current.content.clone()));
    }
}

/// Render a knowledge block as compact text for prompt inclusion.
fn render_block(block: &serde_json::Value) -> String {
    match block {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::Channel;

    fn fixtures() -> (tempfile::TempDir, KnowledgeIndex, Contact, Conversation) {
        let dir = tempfile::tempdir().unwrap();
        for (category, name, body) in [
            ("company", "profile", r#"{"name": "Acme"}"#),
            ("company", "tone-of-voice", r#"{"style": "warm and direct"}"#),
            (
                "sales",
                "products",
                r#"{"products": [{"id": "p1", "name": "Widget", "price": 9}]}"#,
            ),
            (
                "support",
                "faq",
                r#"{"faqs": [{"question": "How do refunds work?", "answer": "30 days.", "keywords": ["refund"]}]}"#,
            ),
        ] {
            let cat = dir.path().join(category);
            std::fs::create_dir_all(&cat).unwrap();
            std::fs::write(cat.join(format!("{name}.json")), body).unwrap();
        }
        let index = KnowledgeIndex::load(dir.path()).unwrap();

        let contact = Contact::new("+100", Channel::Whatsapp, Some("Maya".to_string()));
        let mut conversation = Conversation::new(&contact.id, Channel::Whatsapp);
        for i in 0..8 {
            let direction = if i % 2 == 0 {
                Direction::Inbound
            } else {
                Direction::Outbound
            };
            conversation.messages.push(Message::new(
                &conversation.id,
                &contact.id,
                direction,
                format!("turn {i}"),
                Channel::Whatsapp,
            ));
        }
        (dir, index, contact, conversation)
    }

    #[test]
    fn router_prompt_carries_five_messages_plus_current() {
        let (_dir, index, contact, conversation) = fixtures();
        let current = Message::new(
            &conversation.id,
            &contact.id,
            Direction::Inbound,
            "I want to buy a widget",
            Channel::Whatsapp,
        );

        let prompt = build_router_prompt(&index, &conversation, &current);
        assert!(prompt.system.contains("JSON"));
        assert_eq!(prompt.history.len(), 6);
        assert_eq!(prompt.history.last().unwrap().content, "I want to buy a widget");
    }

    #[test]
    fn current_message_is_not_duplicated_when_already_last() {
        let (_dir, index, contact, mut conversation) = fixtures();
        let current = Message::new(
            &conversation.id,
            &contact.id,
            Direction::Inbound,
            "latest question",
            Channel::Whatsapp,
        );
        conversation.messages.push(current.clone());

        let prompt = build_router_prompt(&index, &conversation, &current);
        let matching = prompt
            .history
            .iter()
            .filter(|m| m.content == "latest question")
            .count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn persona_prompt_substitutes_and_sections() {
        let (_dir, index, contact, conversation) = fixtures();
        let persona = crate::personas::builtin_personas()
            .into_iter()
            .find(|p| p.key == "sales")
            .unwrap();
        let current = Message::new(
            &conversation.id,
            &contact.id,
            Direction::Inbound,
            "do you do refunds?",
            Channel::Whatsapp,
        );

        let prompt = build_persona_prompt(&persona, &current, &conversation, &contact, &index);

        assert!(prompt.system.contains("Acme"));
        assert!(prompt.system.contains("Maya"));
        assert!(prompt.system.contains("whatsapp"));
        assert!(!prompt.system.contains("{companyName}"));
        assert!(prompt.system.contains("## Tone of Voice"));
        assert!(prompt.system.contains("## Knowledge Base"));
        assert!(prompt.system.contains("Relevant FAQ Matches"));
        assert!(prompt.system.contains("## Customer Info"));
        assert!(prompt.system.contains("## Conversation Context"));
        assert!(prompt.system.contains("Current stage:"));
    }

    #[test]
    fn oversized_knowledge_blocks_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sales = dir.path().join("sales");
        std::fs::create_dir_all(&sales).unwrap();
        let huge = format!(r#"{{"blob": "{}"}}"#, "x".repeat(MAX_PROMPT_CHARS));
        std::fs::write(sales.join("products.json"), huge).unwrap();
        let index = KnowledgeIndex::load(dir.path()).unwrap();

        let contact = Contact::new("+1", Channel::Web, None);
        let conversation = Conversation::new(&contact.id, Channel::Web);
        let persona = crate::personas::builtin_personas()
            .into_iter()
            .find(|p| p.key == "sales")
            .unwrap();
        let current = Message::new(&conversation.id, &contact.id, Direction::Inbound, "hi", Channel::Web);

        let prompt = build_persona_prompt(&persona, &current, &conversation, &contact, &index);
        assert!(prompt.system.len() < MAX_PROMPT_CHARS);
        assert!(!prompt.system.contains("xxx"));
    }

    #[test]
    fn history_is_capped_at_twenty() {
        let (_dir, index, contact, mut conversation) = fixtures();
        for i in 0..30 {
            conversation.messages.push(Message::new(
                &conversation.id,
                &contact.id,
                Direction::Inbound,
                format!("extra {i}"),
                Channel::Whatsapp,
            ));
        }
        let persona = crate::personas::builtin_personas()
            .into_iter()
            .find(|p| p.key == "support")
            .unwrap();
        let current = Message::new(
            &conversation.id,
            &contact.id,
            Direction::Inbound,
            "extra 29",
            Channel::Whatsapp,
        );

        let prompt = build_persona_prompt(&persona, &current, &conversation, &contact, &index);
        assert_eq!(prompt.history.len(), 20);
    }
}
