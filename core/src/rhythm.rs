//! Structural and emotional-pressure signals.
//!
//! Pure function of the normalized text: no I/O, no randomness, no maps
//! whose iteration order could leak into the result.

use std::collections::BTreeMap;

use crate::normalize::{Utterance, is_cjk};

/// Tokens-per-clause at which `pace` saturates.
const PACE_SATURATION: f64 = 16.0;
/// Weighted punctuation hits at which `punctuation_pressure` saturates.
const PUNCT_SATURATION: f64 = 3.0;
/// Minimum letters before the caps ratio is considered meaningful.
const CAPS_MIN_LETTERS: usize = 4;

const W_PUNCT: f64 = 0.45;
const W_CAPS: f64 = 0.35;
const W_REPEAT: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RhythmProfile {
    /// Mean clause length, normalized to [0, 1].
    pub pace: f64,
    /// Pause marks per token, clamped to [0, 1].
    pub pause_density: f64,
    /// Exclamation / question / repeated-mark pressure in [0, 1].
    pub punctuation_pressure: f64,
    /// Share of uppercase letters in [0, 1].
    pub caps_ratio: f64,
    /// Share of tokens that repeat an earlier token in [0, 1].
    pub repetition: f64,
    /// Composite pressure in [0, 1].
    pub pressure: f64,
    pub clause_count: usize,
}

pub fn analyze(utterance: &Utterance) -> RhythmProfile {
    let text = utterance.text();
    let tokens = utterance.token_count().max(1) as f64;

    let clause_count = count_clauses(text).max(1);
    let pace = clamp_unit((utterance.token_count() as f64 / clause_count as f64) / PACE_SATURATION);

    let pause_density = clamp_unit(count_pauses(text) as f64 / tokens);

    let marks = count_pressure_marks(text);
    let punctuation_pressure = clamp_unit(
        (marks.exclamations as f64 + 0.5 * marks.questions as f64 + 1.5 * marks.repeated_runs as f64)
            / PUNCT_SATURATION,
    );

    let caps_ratio = caps_ratio(text);
    let repetition = repetition(text);

    let pressure =
        clamp_unit(W_PUNCT * punctuation_pressure + W_CAPS * caps_ratio + W_REPEAT * repetition);

    RhythmProfile {
        pace,
        pause_density,
        punctuation_pressure,
        caps_ratio,
        repetition,
        pressure,
        clause_count,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn is_clause_break(ch: char) -> bool {
    matches!(
        ch,
        '.' | '!' | '?' | ',' | ';' | ':' | '…' | '。' | '！' | '？' | '，' | '；' | '：' | '、'
    )
}

fn is_pause(ch: char) -> bool {
    matches!(ch, ',' | ';' | ':' | '…' | '—' | '–' | '，' | '；' | '：' | '、')
}

/// Number of non-empty segments between clause breaks.
fn count_clauses(text: &str) -> usize {
    text.split(is_clause_break)
        .filter(|segment| segment.chars().any(|ch| ch.is_alphanumeric() || is_cjk(ch)))
        .count()
}

/// Pause marks; a run of dots ("...") counts as one ellipsis pause.
fn count_pauses(text: &str) -> usize {
    let mut pauses = text.chars().filter(|ch| is_pause(*ch)).count();
    let mut dots = 0;
    for ch in text.chars().chain(std::iter::once(' ')) {
        if ch == '.' {
            dots += 1;
        } else {
            if dots >= 2 {
                pauses += 1;
            }
            dots = 0;
        }
    }
    pauses
}

struct PressureMarks {
    exclamations: usize,
    questions: usize,
    repeated_runs: usize,
}

fn count_pressure_marks(text: &str) -> PressureMarks {
    let mut exclamations = 0;
    let mut questions = 0;
    let mut repeated_runs = 0;
    let mut run = 0;

    for ch in text.chars().chain(std::iter::once(' ')) {
        let emphatic = matches!(ch, '!' | '?' | '！' | '？');
        match ch {
            '!' | '！' => exclamations += 1,
            '?' | '？' => questions += 1,
            _ => {}
        }
        if emphatic {
            run += 1;
        } else {
            if run >= 2 {
                repeated_runs += 1;
            }
            run = 0;
        }
    }

    PressureMarks {
        exclamations,
        questions,
        repeated_runs,
    }
}

fn caps_ratio(text: &str) -> f64 {
    let letters: Vec<char> = text.chars().filter(|ch| ch.is_alphabetic() && !is_cjk(*ch)).collect();
    if letters.len() < CAPS_MIN_LETTERS {
        return 0.0;
    }
    let upper = letters.iter().filter(|ch| ch.is_uppercase()).count();
    // A leading capital on a normal sentence is not shouting.
    let baseline = usize::from(letters.first().is_some_and(|ch| ch.is_uppercase()));
    let excess = upper.saturating_sub(baseline);
    clamp_unit(excess as f64 / letters.len() as f64)
}

fn repetition(text: &str) -> f64 {
    let words: Vec<String> = text
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .collect();
    if words.len() < 2 {
        return 0.0;
    }
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut repeats = 0;
    for word in &words {
        let count = seen.entry(word.as_str()).or_insert(0);
        if *count > 0 {
            repeats += 1;
        }
        *count += 1;
    }
    clamp_unit(repeats as f64 / words.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::LengthGate;

    fn profile(text: &str) -> RhythmProfile {
        let gate = LengthGate {
            min_chars: 1,
            max_chars: 1000,
        };
        analyze(&gate.normalize(text).expect("valid input"))
    }

    #[test]
    fn calm_sentence_has_low_pressure() {
        let p = profile("The meeting is scheduled for Tuesday afternoon.");
        assert_eq!(p.punctuation_pressure, 0.0);
        assert_eq!(p.caps_ratio, 0.0);
        assert_eq!(p.repetition, 0.0);
        assert_eq!(p.pressure, 0.0);
        assert_eq!(p.clause_count, 1);
    }

    #[test]
    fn shouting_raises_pressure() {
        let calm = profile("please answer me now");
        let loud = profile("PLEASE ANSWER ME NOW!!!");
        assert!(loud.pressure > calm.pressure);
        assert!(loud.caps_ratio > 0.9);
        assert!(loud.punctuation_pressure > 0.9);
    }

    #[test]
    fn ellipsis_and_commas_count_as_pauses() {
        let p = profile("well... I mean, maybe, sort of");
        // one ellipsis + two commas over six tokens
        assert!((p.pause_density - 3.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn repeated_words_are_detected() {
        let p = profile("no no no no");
        assert!((p.repetition - 0.75).abs() < 1e-12);
    }

    #[test]
    fn all_signals_stay_in_unit_interval() {
        for text in [
            "!!!!!!!!!!!!!!!!!!!!",
            "a",
            "WHY WHY WHY WHY?!?!?! ARE YOU SERIOUS???",
            "一二三四五六七八九十一二三四五六七八九十一二三四五六七八九十",
        ] {
            let p = profile(text);
            for v in [
                p.pace,
                p.pause_density,
                p.punctuation_pressure,
                p.caps_ratio,
                p.repetition,
                p.pressure,
            ] {
                assert!((0.0..=1.0).contains(&v), "{text}: {v}");
            }
        }
    }

    #[test]
    fn identical_input_yields_identical_profile() {
        let text = "Hurry up, I need this NOW!! Seriously, now.";
        let first = profile(text);
        for _ in 0..20 {
            assert_eq!(profile(text), first);
        }
    }
}
