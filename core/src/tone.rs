use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed set of tone categories. Adding a member is a schema-version event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum ToneType {
    Anxious,
    Cold,
    Sharp,
    Blur,
    Pushy,
    Rhythm,
    Unknown,
}

impl ToneType {
    pub const ALL: [ToneType; 7] = [
        ToneType::Anxious,
        ToneType::Cold,
        ToneType::Sharp,
        ToneType::Blur,
        ToneType::Pushy,
        ToneType::Rhythm,
        ToneType::Unknown,
    ];

    /// Scored tones in tie-break priority order: on equal scores the earlier
    /// entry wins. Unknown is never scored; it is the below-floor result.
    pub const PRIORITY: [ToneType; 6] = [
        ToneType::Anxious,
        ToneType::Sharp,
        ToneType::Pushy,
        ToneType::Cold,
        ToneType::Blur,
        ToneType::Rhythm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToneType::Anxious => "Anxious",
            ToneType::Cold => "Cold",
            ToneType::Sharp => "Sharp",
            ToneType::Blur => "Blur",
            ToneType::Pushy => "Pushy",
            ToneType::Rhythm => "Rhythm",
            ToneType::Unknown => "Unknown",
        }
    }

    pub(crate) fn priority_rank(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|tone| *tone == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

/// Repair action class chosen for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Mode {
    #[serde(rename = "repair")]
    Repair,
    #[serde(rename = "suggest")]
    Suggest,
    #[serde(rename = "no-op")]
    NoOp,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Repair, Mode::Suggest, Mode::NoOp];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Repair => "repair",
            Mode::Suggest => "suggest",
            Mode::NoOp => "no-op",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "repair" => Some(Mode::Repair),
            "suggest" => Some(Mode::Suggest),
            "no-op" | "noop" | "no_op" => Some(Mode::NoOp),
            _ => None,
        }
    }
}

/// Tri-state governance verdict for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionState {
    Allow,
    Guide,
    Block,
}

impl DecisionState {
    pub const ALL: [DecisionState; 3] =
        [DecisionState::Allow, DecisionState::Guide, DecisionState::Block];

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionState::Allow => "ALLOW",
            DecisionState::Guide => "GUIDE",
            DecisionState::Block => "BLOCK",
        }
    }
}
