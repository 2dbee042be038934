use parley_conversations::Conversation;
use serde::{Deserialize, Serialize};

/// Phrases that signal purchase intent.
pub const BUYING_KEYWORDS: &[&str] = &[
    "buy",
    "purchase",
    "order",
    "checkout",
    "how much",
    "price",
    "payment",
    "sign me up",
];

/// Phrases that signal a sales objection.
pub const OBJECTION_KEYWORDS: &[&str] = &[
    "expensive",
    "too much",
    "cheaper",
    "competitor",
    "not sure",
    "think about it",
    "why should i",
];

/// Phrases that signal the customer is pulling away.
pub const DISENGAGEMENT_KEYWORDS: &[&str] = &[
    "not interested",
    "no thanks",
    "stop",
    "leave me alone",
    "maybe later",
    "unsubscribe",
];

/// Where the sales persona is in its pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SalesStage {
    Qualifying,
    Presenting,
    ObjectionHandling,
    Closing,
}

impl SalesStage {
    /// Stage-specific guidance appended to the persona prompt.
    pub fn guidance(&self) -> &'static str {
        match self {
            SalesStage::Qualifying => {
                "Current stage: qualifying. Ask one or two short questions to \
                 understand what the customer is looking for."
            }
            SalesStage::Presenting => {
                "Current stage: presenting. Recommend the best-matching products \
                 with concrete benefits and prices."
            }
            SalesStage::ObjectionHandling => {
                "Current stage: objection handling. Acknowledge the concern and \
                 address it directly; offer an alternative where it helps."
            }
            SalesStage::Closing => {
                "Current stage: closing. Summarize the choice and make the next \
                 step to purchase explicit and easy."
            }
        }
    }
}

/// Decide the stage from the conversation's inbound history.
///
/// Precedence: closing (buying signal and more than three inbound turns),
/// then objection handling, then presenting (more than two inbound turns),
/// then qualifying.
pub fn determine_stage(conversation: &Conversation) -> SalesStage {
    let inbound = conversation.inbound_count();
    let buying = count_signal_messages(conversation, BUYING_KEYWORDS);
    let objections = count_signal_messages(conversation, OBJECTION_KEYWORDS);

    if buying > 0 && inbound > 3 {
        SalesStage::Closing
    } else if objections > 0 {
        SalesStage::ObjectionHandling
    } else if inbound > 2 {
        SalesStage::Presenting
    } else {
        SalesStage::Qualifying
    }
}

/// Lead score in [0, 100].
///
/// Base 20, +5 per inbound message capped at +25, +8 per buying signal,
/// −10 per disengagement signal.
pub fn lead_score(conversation: &Conversation) -> u8 {
    let inbound = conversation.inbound_count() as i64;
    let buying = count_signal_messages(conversation, BUYING_KEYWORDS) as i64;
    let disengaged = count_signal_messages(conversation, DISENGAGEMENT_KEYWORDS) as i64;

    let score = 20 + (5 * inbound).min(25) + 8 * buying - 10 * disengaged;
    score.clamp(0, 100) as u8
}

/// Number of inbound messages containing at least one of `keywords`.
fn count_signal_messages(conversation: &Conversation, keywords: &[&str]) -> usize {
    conversation
        .messages
        .iter()
        .filter(|m| m.is_inbound())
        .filter(|m| {
            let lowered = m.content.to_lowercase();
            keywords.iter().any(|k| lowered.contains(k))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_conversations::{Direction, Message};
    use parley_core::types::Channel;

    fn conversation(inbound: &[&str]) -> Conversation {
        let mut conv = Conversation::new("c1", Channel::Whatsapp);
        for content in inbound {
            conv.messages.push(Message::new(
                &conv.id,
                "c1",
                Direction::Inbound,
                *content,
                Channel::Whatsapp,
            ));
            conv.messages.push(Message::new(
                &conv.id,
                "c1",
                Direction::Outbound,
                "reply",
                Channel::Whatsapp,
            ));
        }
        conv
    }

    #[test]
    fn fresh_conversations_qualify() {
        assert_eq!(
            determine_stage(&conversation(&["hi there"])),
            SalesStage::Qualifying
        );
    }

    #[test]
    fn volume_moves_to_presenting() {
        assert_eq!(
            determine_stage(&conversation(&["hi", "looking around", "tell me more"])),
            SalesStage::Presenting
        );
    }

    #[test]
    fn objections_take_precedence_over_presenting() {
        assert_eq!(
            determine_stage(&conversation(&["hi", "hm", "that's too much", "really"])),
            SalesStage::ObjectionHandling
        );
    }

    #[test]
    fn buying_signals_with_depth_reach_closing() {
        assert_eq!(
            determine_stage(&conversation(&[
                "hi",
                "tell me more",
                "looks good",
                "ok how much is it"
            ])),
            SalesStage::Closing
        );
    }

    #[test]
    fn lead_score_follows_the_formula() {
        // 2 inbound (+10), one buying signal (+8): 20 + 10 + 8 = 38
        let conv = conversation(&["hello", "what's the price"]);
        assert_eq!(lead_score(&conv), 38);
    }

    #[test]
    fn lead_score_caps_inbound_bonus_and_floors_at_zero() {
        // 10 inbound → bonus capped at 25.
        let contents: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
        let refs: Vec<&str> = contents.iter().map(|s| s.as_str()).collect();
        assert_eq!(lead_score(&conversation(&refs)), 45);

        // Heavy disengagement cannot push below zero.
        let conv = conversation(&["not interested", "stop", "unsubscribe", "leave me alone"]);
        assert_eq!(lead_score(&conv), 0);
    }
}
