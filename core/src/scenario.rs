use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::normalize::Utterance;

/// Contextual tag attached to a decision. Categorical, never content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Support,
    Workplace,
    CustomerService,
    Relationship,
    General,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Support,
        Scenario::Workplace,
        Scenario::CustomerService,
        Scenario::Relationship,
        Scenario::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Support => "support",
            Scenario::Workplace => "workplace",
            Scenario::CustomerService => "customer_service",
            Scenario::Relationship => "relationship",
            Scenario::General => "general",
        }
    }
}

/// Checked in order; the first scenario with a hit wins.
const CUES: &[(Scenario, &[&str])] = &[
    (
        Scenario::Support,
        &["help", "support", "anymore", "overwhelmed", "scared", "alone", "幫"],
    ),
    (
        Scenario::CustomerService,
        &["refund", "order", "delivery", "customer", "invoice", "subscription", "退款"],
    ),
    (
        Scenario::Workplace,
        &["deadline", "meeting", "boss", "manager", "project", "report", "team", "會議"],
    ),
    (
        Scenario::Relationship,
        &["friend", "partner", "family", "mom", "dad", "love", "朋友"],
    ),
];

/// Deterministic keyword scenario detector.
pub fn detect(utterance: &Utterance) -> Scenario {
    let lowered = utterance.text().to_lowercase();
    let words: Vec<&str> = lowered
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    for (scenario, cues) in CUES {
        let hit = cues.iter().any(|cue| {
            if cue.is_ascii() {
                words.iter().any(|w| w == cue)
            } else {
                lowered.contains(cue)
            }
        });
        if hit {
            return *scenario;
        }
    }
    Scenario::General
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::LengthGate;

    fn scenario(text: &str) -> Scenario {
        let gate = LengthGate {
            min_chars: 1,
            max_chars: 1000,
        };
        detect(&gate.normalize(text).unwrap())
    }

    #[test]
    fn support_wins_over_workplace() {
        assert_eq!(
            scenario("I can't take this anymore, please help"),
            Scenario::Support
        );
        assert_eq!(
            scenario("help me finish the project report"),
            Scenario::Support
        );
    }

    #[test]
    fn detects_workplace_and_general() {
        assert_eq!(
            scenario("The meeting is scheduled for Tuesday afternoon."),
            Scenario::Workplace
        );
        assert_eq!(scenario("Nice weather today."), Scenario::General);
    }

    #[test]
    fn matches_whole_words_only() {
        assert_eq!(scenario("helpful borders"), Scenario::General);
    }
}
