//! The synchronous decision pipeline:
//! normalize → analyze → classify → calibrate → route.
//!
//! Holds only immutable configuration, so concurrent requests cannot
//! influence each other's decisions.

use crate::calibrate::{CalibratedConfidence, calibrate};
use crate::classify::{ClassificationResult, ToneClassifier};
use crate::config::GovernanceConfig;
use crate::normalize::{LengthGate, Rejection, Utterance};
use crate::repair::guidance_for;
use crate::rhythm::{self, RhythmProfile};
use crate::router::{DecisionRouter, Route, RouterConfig};
use crate::scenario::{self, Scenario};
use crate::tone::{Mode, ToneType};

#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    gate: LengthGate,
    classifier: ToneClassifier,
    router: DecisionRouter,
}

/// Everything derived from one utterance. Lives for one request.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub utterance: Utterance,
    pub profile: RhythmProfile,
    pub classification: ClassificationResult,
    pub confidence: CalibratedConfidence,
    pub route: Route,
    pub scenario: Scenario,
}

impl Assessment {
    pub fn tone(&self) -> ToneType {
        self.classification.label
    }

    /// Guidance text for suggest-mode decisions.
    pub fn repair_note(&self) -> Option<&'static str> {
        (self.route.mode == Mode::Suggest).then(|| guidance_for(self.tone()))
    }
}

impl Pipeline {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            gate: LengthGate::from_config(config),
            classifier: ToneClassifier::new(config.tone_floor),
            router: DecisionRouter::new(RouterConfig::from_config(config)),
        }
    }

    pub fn gate(&self) -> LengthGate {
        self.gate
    }

    pub fn router(&self) -> &DecisionRouter {
        &self.router
    }

    /// A rejection short-circuits before any analysis runs.
    pub fn assess(&self, raw: &str) -> Result<Assessment, Rejection> {
        let utterance = self.gate.normalize(raw)?;
        let profile = rhythm::analyze(&utterance);
        let classification = self.classifier.classify(&utterance, &profile);
        let confidence = calibrate(&classification, &profile);
        let route = self.router.route(
            classification.label,
            confidence,
            classification.out_of_scope,
            profile.pressure,
        );
        let scenario = scenario::detect(&utterance);
        Ok(Assessment {
            utterance,
            profile,
            classification,
            confidence,
            route,
            scenario,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RejectionReason;
    use crate::tone::DecisionState;

    fn pipeline() -> Pipeline {
        Pipeline::from_config(&GovernanceConfig::default())
    }

    #[test]
    fn anxious_plea_is_guided_to_repair() {
        let a = pipeline()
            .assess("I can't take this anymore, please help")
            .unwrap();
        assert_eq!(a.route.decision_state, DecisionState::Guide);
        assert_eq!(a.tone(), ToneType::Anxious);
        assert_eq!(a.route.mode, Mode::Repair);
        assert_eq!(a.scenario, Scenario::Support);
        assert!(a.repair_note().is_none());
    }

    #[test]
    fn crisis_marker_blocks() {
        for text in [
            "I just want to end my life",
            "PLEASE HELP I want to die!!!",
            "maybe I should just kill myself",
        ] {
            let a = pipeline().assess(text).unwrap();
            assert_eq!(a.route.decision_state, DecisionState::Block, "{text}");
            assert_eq!(a.route.mode, Mode::NoOp, "{text}");
        }
    }

    #[test]
    fn calm_text_is_allowed() {
        let a = pipeline()
            .assess("The meeting is scheduled for Tuesday afternoon.")
            .unwrap();
        assert_eq!(a.route.decision_state, DecisionState::Allow);
        assert_eq!(a.route.mode, Mode::NoOp);
        assert!(a.confidence.value() < 0.30);
    }

    #[test]
    fn everyday_sentences_are_allowed() {
        let p = pipeline();
        for text in [
            "Could you please send me the updated schedule for next week's meeting",
            "I would like to book a table for two people at seven tonight",
            "The quarterly report is ready for review, and the finance team will present it on Tuesday afternoon.",
            "Thanks for the quick reply. I will forward the signed contract to our legal department tomorrow morning.",
            "Our team finished migrating the billing service last week and the dashboards look stable so far.",
        ] {
            let a = p.assess(text).unwrap();
            assert_eq!(a.tone(), ToneType::Unknown, "{text}");
            assert_eq!(a.route.decision_state, DecisionState::Allow, "{text}");
            assert_eq!(a.route.mode, Mode::NoOp, "{text}");
        }
    }

    #[test]
    fn short_input_is_rejected_before_classification() {
        let rejection = pipeline().assess("   ").unwrap_err();
        assert_eq!(rejection.reason, RejectionReason::TooShort);
        let rejection = pipeline().assess(&"a".repeat(1001)).unwrap_err();
        assert_eq!(rejection.reason, RejectionReason::TooLong);
    }

    #[test]
    fn mild_tone_gets_a_suggestion() {
        let a = pipeline().assess("whatever").unwrap();
        assert_eq!(a.tone(), ToneType::Cold);
        assert_eq!(a.route.mode, Mode::Suggest);
        assert_eq!(a.route.decision_state, DecisionState::Guide);
        assert_eq!(a.repair_note(), Some(guidance_for(ToneType::Cold)));
    }

    #[test]
    fn repeated_runs_never_flip() {
        let inputs = [
            "I can't take this anymore, please help",
            "whatever",
            "THIS IS RIDICULOUS!!! Fix it right now",
            "maybe, I guess, sort of",
            "no no no no no",
            "The meeting is scheduled for Tuesday afternoon.",
            "我很擔心，怎麼辦？",
        ];
        let p = pipeline();
        for text in inputs {
            let first = p.assess(text).unwrap();
            for _ in 0..25 {
                let again = p.assess(text).unwrap();
                assert_eq!(again.route, first.route, "{text}");
                assert_eq!(again.tone(), first.tone(), "{text}");
                assert_eq!(again.confidence, first.confidence, "{text}");
            }
        }
    }

    #[test]
    fn whitespace_variants_decide_identically() {
        let p = pipeline();
        let a = p.assess("please help   me").unwrap();
        let b = p.assess("  please help me\n").unwrap();
        assert_eq!(a.route, b.route);
        assert_eq!(a.confidence, b.confidence);
    }
}
