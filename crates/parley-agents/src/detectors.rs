use parley_conversations::Message;

/// Explicit handoff request phrases, checked as case-insensitive substrings.
pub const HANDOFF_KEYWORDS: &[&str] = &[
    "human",
    "agent",
    "manager",
    "representative",
    "real person",
    "speak to someone",
    "talk to a person",
    "customer service",
];

/// Localized handoff request phrases. Detection always checks the generic
/// list and every localized list as a union — the active conversation
/// language does not gate which list applies.
pub const HANDOFF_KEYWORDS_LOCALIZED: &[&str] = &[
    "נציג",
    "נציג אנושי",
    "שירות לקוחות",
    "מנהל",
    "بشري",
    "موظف",
    "خدمة العملاء",
];

/// Words that mark an inbound message as negative for the streak detector.
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "terrible",
    "awful",
    "horrible",
    "worst",
    "unacceptable",
    "useless",
    "angry",
    "furious",
    "ridiculous",
    "scam",
];

/// Severe frustration words (weight 3).
const SEVERE_WORDS: &[&str] = &[
    "unacceptable",
    "furious",
    "outraged",
    "disgusted",
    "scam",
    "lawyer",
    "lawsuit",
    "fraud",
];

/// Mild frustration words (weight 1).
const MILD_WORDS: &[&str] = &[
    "annoyed",
    "disappointed",
    "unhappy",
    "frustrated",
    "waiting",
    "slow",
    "bad",
    "terrible",
    "worst",
];

/// Refund/return phrases that escalate a support conversation.
pub const REFUND_KEYWORDS: &[&str] = &[
    "refund",
    "return",
    "money back",
    "chargeback",
    "cancel my order",
];

/// Inbound messages considered by the frustration window.
const FRUSTRATION_WINDOW: usize = 5;

/// Escalate once the frustration score reaches this.
pub const FRUSTRATION_THRESHOLD: u32 = 5;

/// Consecutive negative inbound messages that force handoff.
pub const NEGATIVE_STREAK_LIMIT: usize = 3;

/// Did the customer explicitly ask for a human?
pub fn wants_human(content: &str) -> bool {
    let lowered = content.to_lowercase();
    HANDOFF_KEYWORDS.iter().any(|k| lowered.contains(k))
        || HANDOFF_KEYWORDS_LOCALIZED.iter().any(|k| content.contains(k))
}

/// Does the content mention refunds or returns?
pub fn mentions_refund(content: &str) -> bool {
    let lowered = content.to_lowercase();
    REFUND_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Length of the trailing run of negative inbound messages.
pub fn negative_streak(inbound: &[&Message]) -> usize {
    inbound
        .iter()
        .rev()
        .take_while(|m| {
            let lowered = m.content.to_lowercase();
            NEGATIVE_KEYWORDS.iter().any(|k| lowered.contains(k))
        })
        .count()
}

/// Frustration score over the last five inbound messages.
///
/// Severe words count 3, mild words 1, an ALL-CAPS message longer than 10
/// characters counts 2, and each run of two or more `!`/`?` counts 1.
/// The score only grows as trigger words accumulate in the window.
pub fn frustration_score(inbound: &[&Message]) -> u32 {
    let start = inbound.len().saturating_sub(FRUSTRATION_WINDOW);
    let mut score = 0u32;

    for message in &inbound[start..] {
        let lowered = message.content.to_lowercase();

        for word in SEVERE_WORDS {
            score += 3 * lowered.matches(word).count() as u32;
        }
        for word in MILD_WORDS {
            score += lowered.matches(word).count() as u32;
        }

        if is_shouting(&message.content) {
            score += 2;
        }

        score += punctuation_runs(&message.content);
    }

    score
}

/// ALL-CAPS with at least one letter and more than 10 characters total.
fn is_shouting(content: &str) -> bool {
    content.chars().count() > 10
        && content.chars().any(|c| c.is_alphabetic())
        && !content.chars().any(|c| c.is_lowercase())
}

/// Count runs of `!` or `?` with length ≥ 2.
fn punctuation_runs(content: &str) -> u32 {
    let mut runs = 0u32;
    let mut current = 0usize;
    for ch in content.chars() {
        if ch == '!' || ch == '?' {
            current += 1;
        } else {
            if current >= 2 {
                runs += 1;
            }
            current = 0;
        }
    }
    if current >= 2 {
        runs += 1;
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_conversations::Direction;
    use parley_core::types::Channel;

    fn inbound(content: &str) -> Message {
        Message::new("conv", "contact", Direction::Inbound, content, Channel::Web)
    }

    #[test]
    fn explicit_handoff_phrases_match_either_language() {
        assert!(wants_human("I want to speak to a human agent now"));
        assert!(wants_human("get me a MANAGER"));
        assert!(wants_human("אני רוצה נציג"));
        assert!(!wants_human("what's the price?"));
    }

    #[test]
    fn streak_counts_only_the_trailing_run() {
        let msgs = [
            inbound("this is terrible"),
            inbound("actually it's fine"),
            inbound("awful"),
            inbound("the worst"),
        ];
        let refs: Vec<&Message> = msgs.iter().collect();
        assert_eq!(negative_streak(&refs), 2);
    }

    #[test]
    fn frustration_weights_follow_the_rubric() {
        let msgs = [
            inbound("TERRIBLE SERVICE!!!"), // mild "terrible" 1 + caps 2 + run 1 = 4
            inbound("unacceptable"),        // severe 3
        ];
        let refs: Vec<&Message> = msgs.iter().collect();
        assert_eq!(frustration_score(&refs), 7);
    }

    #[test]
    fn frustration_is_monotone_in_trigger_words() {
        let mut msgs = vec![inbound("slow reply")];
        let mut previous = {
            let refs: Vec<&Message> = msgs.iter().collect();
            frustration_score(&refs)
        };
        for extra in ["still waiting", "disappointed now", "unacceptable!!"] {
            msgs.push(inbound(extra));
            let refs: Vec<&Message> = msgs.iter().collect();
            let score = frustration_score(&refs);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn window_is_capped_at_five_messages() {
        // Six angry messages; the first must fall out of the window.
        let msgs: Vec<Message> = (0..6).map(|_| inbound("unacceptable")).collect();
        let refs: Vec<&Message> = msgs.iter().collect();
        assert_eq!(frustration_score(&refs), 15); // 5 × 3, not 6 × 3
    }

    #[test]
    fn shouting_requires_length_and_letters() {
        assert!(is_shouting("I AM VERY ANGRY"));
        assert!(!is_shouting("OK!!"));        // too short
        assert!(!is_shouting("123456789012")); // no letters
        assert!(!is_shouting("Mixed CASE TEXT here"));
    }

    #[test]
    fn punctuation_runs_need_two_marks() {
        assert_eq!(punctuation_runs("what?! really??"), 2);
        assert_eq!(punctuation_runs("fine."), 0);
        assert_eq!(punctuation_runs("no way!!!"), 1);
    }
}
