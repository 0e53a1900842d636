//! Rule-based tone classifier over the closed [`ToneType`] set.
//!
//! Scores are accumulated in fixed arrays indexed by priority, never in a
//! hash map, so the result cannot depend on iteration order. Ties resolve
//! to the earlier entry of [`ToneType::PRIORITY`].

use crate::normalize::Utterance;
use crate::rhythm::RhythmProfile;
use crate::tone::ToneType;

/// A weighted trigger phrase. Latin phrases match on word boundaries of the
/// folded text; CJK phrases match as substrings.
struct Trigger {
    phrase: &'static str,
    weight: f64,
}

const fn t(phrase: &'static str, weight: f64) -> Trigger {
    Trigger { phrase, weight }
}

const ANXIOUS: &[Trigger] = &[
    t("can't take", 0.6),
    t("cannot take", 0.6),
    t("anymore", 0.3),
    t("please help", 0.5),
    t("help me", 0.4),
    t("worried", 0.5),
    t("scared", 0.5),
    t("afraid", 0.5),
    t("nervous", 0.5),
    t("anxious", 0.6),
    t("overwhelmed", 0.6),
    t("panic", 0.5),
    t("what if", 0.3),
    t("don't know what to do", 0.6),
    t("擔心", 0.5),
    t("害怕", 0.5),
    t("焦慮", 0.6),
];

const SHARP: &[Trigger] = &[
    t("stupid", 0.6),
    t("idiot", 0.7),
    t("ridiculous", 0.5),
    t("useless", 0.6),
    t("nonsense", 0.5),
    t("are you kidding", 0.5),
    t("how many times", 0.5),
    t("what is wrong with you", 0.7),
    t("obviously", 0.3),
    t("seriously", 0.3),
    t("廢物", 0.7),
    t("白痴", 0.7),
];

const PUSHY: &[Trigger] = &[
    t("you must", 0.5),
    t("you have to", 0.5),
    t("right now", 0.5),
    t("immediately", 0.5),
    t("asap", 0.5),
    t("hurry", 0.4),
    t("no excuses", 0.6),
    t("do it now", 0.6),
    t("need this now", 0.6),
    t("i demand", 0.7),
    t("馬上", 0.5),
    t("立刻", 0.5),
];

const COLD: &[Trigger] = &[
    t("whatever", 0.5),
    t("fine then", 0.5),
    t("noted", 0.4),
    t("don't care", 0.6),
    t("not my problem", 0.7),
    t("as you wish", 0.5),
    t("if you say so", 0.5),
    t("do what you want", 0.5),
    t("隨便", 0.6),
    t("無所謂", 0.6),
];

const BLUR: &[Trigger] = &[
    t("maybe", 0.3),
    t("kind of", 0.35),
    t("sort of", 0.35),
    t("i guess", 0.35),
    t("not sure", 0.35),
    t("perhaps", 0.3),
    t("somehow", 0.3),
    t("i don't know", 0.3),
    t("something like", 0.3),
    t("或許", 0.3),
    t("好像", 0.3),
];

/// Crisis markers. A hit is out of scope for tone repair and escalates.
const CRISIS: &[&str] = &[
    "kill myself",
    "killing myself",
    "suicide",
    "suicidal",
    "end my life",
    "want to die",
    "self harm",
    "hurt myself",
    "cut myself",
    "no reason to live",
    "better off dead",
    "自殺",
    "想死",
    "不想活",
];

/// Full per-tone score table, in [`ToneType::PRIORITY`] order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneScores(pub [f64; 6]);

impl ToneScores {
    pub fn get(&self, tone: ToneType) -> f64 {
        self.0.get(tone.priority_rank()).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: ToneType,
    /// `score(label) - score(runner_up)`, always >= 0.
    pub margin: f64,
    pub runner_up: ToneType,
    pub scores: ToneScores,
    /// Score assigned to Unknown when it wins: the configured floor.
    pub floor: f64,
    /// Crisis marker detected; routes to BLOCK regardless of confidence.
    pub out_of_scope: bool,
    /// Trigger phrases that fired. Internal to the request: these are
    /// content-derived and must never reach a usage event or a log line.
    pub triggers: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct ToneClassifier {
    floor: f64,
}

impl ToneClassifier {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }

    pub fn classify(&self, utterance: &Utterance, profile: &RhythmProfile) -> ClassificationResult {
        let folded = fold(utterance.text());
        let mut triggers = Vec::new();

        let mut raw = [0.0_f64; 6];
        for (slot, tone) in ToneType::PRIORITY.iter().enumerate() {
            raw[slot] = match lexicon(*tone) {
                Some(rules) => lexical_score(&folded, rules, &mut triggers),
                None => rhythm_score(profile),
            };
        }

        // Pressure only amplifies tones that already have lexical evidence.
        let anxious = ToneType::Anxious.priority_rank();
        let sharp = ToneType::Sharp.priority_rank();
        let pushy = ToneType::Pushy.priority_rank();
        if raw[anxious] > 0.0 {
            raw[anxious] += 0.2 * profile.pause_density;
        }
        if raw[sharp] > 0.0 {
            raw[sharp] += 0.3 * profile.punctuation_pressure + 0.2 * profile.caps_ratio;
        }
        if raw[pushy] > 0.0 {
            raw[pushy] += 0.3 * profile.punctuation_pressure;
        }

        let scores = ToneScores(raw);
        let out_of_scope = CRISIS.iter().any(|marker| contains_phrase(&folded, marker));
        let (best, second) = top_two(&scores);
        let best_score = scores.0[best];

        let (label, margin, runner_up) = if best_score < self.floor {
            (ToneType::Unknown, self.floor - best_score, ToneType::PRIORITY[best])
        } else {
            (
                ToneType::PRIORITY[best],
                best_score - scores.0[second],
                ToneType::PRIORITY[second],
            )
        };

        ClassificationResult {
            label,
            margin: margin.max(0.0),
            runner_up,
            scores,
            floor: self.floor,
            out_of_scope,
            triggers,
        }
    }
}

fn lexicon(tone: ToneType) -> Option<&'static [Trigger]> {
    match tone {
        ToneType::Anxious => Some(ANXIOUS),
        ToneType::Sharp => Some(SHARP),
        ToneType::Pushy => Some(PUSHY),
        ToneType::Cold => Some(COLD),
        ToneType::Blur => Some(BLUR),
        ToneType::Rhythm | ToneType::Unknown => None,
    }
}

fn lexical_score(folded: &str, rules: &[Trigger], fired: &mut Vec<&'static str>) -> f64 {
    let mut score = 0.0;
    for rule in rules {
        if contains_phrase(folded, rule.phrase) {
            score += rule.weight;
            fired.push(rule.phrase);
        }
    }
    score
}

/// Pressure below which a long clause is just a long clause.
const RUN_ON_MIN_PRESSURE: f64 = 0.25;
/// Fewer clauses than this cannot read as fragmented.
const FRAGMENT_MIN_CLAUSES: usize = 3;

/// Rhythm tone: run-on, fragmented or looping delivery without a lexical cue.
/// Pace and pauses only count when the delivery is strained; looping stands alone.
fn rhythm_score(profile: &RhythmProfile) -> f64 {
    let run_on = if profile.pressure >= RUN_ON_MIN_PRESSURE {
        0.6 * profile.pace
    } else {
        0.0
    };
    let fragmented = if profile.clause_count >= FRAGMENT_MIN_CLAUSES {
        0.8 * profile.pause_density
    } else {
        0.0
    };
    let looping = (1.2 * profile.repetition).min(1.0);
    run_on.max(fragmented).max(looping)
}

/// Indices of the best and runner-up slot. Strict `>` keeps the earlier
/// (higher-priority) slot on ties.
fn top_two(scores: &ToneScores) -> (usize, usize) {
    let mut best = 0;
    for slot in 1..scores.0.len() {
        if scores.0[slot] > scores.0[best] {
            best = slot;
        }
    }
    let mut second = if best == 0 { 1 } else { 0 };
    for slot in 0..scores.0.len() {
        if slot != best && scores.0[slot] > scores.0[second] {
            second = slot;
        }
    }
    (best, second)
}

/// Lowercase, unify apostrophes, replace separators with single spaces and
/// pad both ends so phrases can be matched on word boundaries.
fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in text.chars().flat_map(char::to_lowercase) {
        let ch = if matches!(ch, '’' | '‘' | '`') { '\'' } else { ch };
        if ch.is_alphanumeric() || ch == '\'' {
            out.push(ch);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

fn contains_phrase(folded: &str, phrase: &str) -> bool {
    if phrase.chars().any(crate::normalize::is_cjk) {
        folded.contains(phrase)
    } else {
        folded.contains(&format!(" {phrase} "))
    }
}
