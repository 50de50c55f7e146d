//! Quick grounding check for final answers.
//!
//! Pure pattern matching, no model call: every quantitative claim in the
//! answer must appear as a number somewhere in the collected observations.
//! A claim is a decimal, a number with a unit or percent sign, or a number
//! counting something ("3 pills", "100 bpm"). Bare years and list ordinals
//! are not claims.

use crate::types::{GroundingMode, GroundingReport};
use regex::Regex;
use std::sync::OnceLock;

fn claim_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)
            \b(?P<num>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)
            (?:\s*(?:-|to|–)\s*\d+(?:\.\d+)?)?
            (?:
                \s*(?P<unit>%|percent\b|mg\b|mcg\b|µg\b|g\b|kg\b|ml\b|l\b|units?\b|iu\b|mmhg\b|
                         mmol/l\b|mg/dl\b|bpm\b|hours?\b|hrs?\b|days?\b|weeks?\b|months?\b|years?\b|
                         times\b|x\b|tablets?\b|capsules?\b|pills?\b|puffs?\b|drops?\b|sprays?\b|
                         doses?\b|patients\b|people\b|cases\b)
              | \s+(?P<word>[a-z][a-z-]*)
            )?",
        )
        .unwrap()
    })
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").unwrap())
}

/// Words that follow a number without making it a count of anything.
const FILLER_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "if", "in", "is",
    "it", "of", "on", "or", "so", "than", "that", "the", "then", "to", "was", "were", "with",
];

fn is_year(raw: &str) -> bool {
    raw.len() == 4 && matches!(raw.parse::<u32>(), Ok(1000..=2999))
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn same_number(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// Scan `answer` for quantitative claims missing from `observations`.
pub fn verify_quick(answer: &str, observations: &str) -> GroundingReport {
    let known: Vec<f64> = number_re()
        .find_iter(observations)
        .filter_map(|m| parse_number(m.as_str()))
        .collect();

    let mut claims_checked = 0;
    let mut ungrounded: Vec<String> = Vec::new();

    for caps in claim_re().captures_iter(answer) {
        let Some(num) = caps.name("num") else {
            continue;
        };
        let has_unit = caps.name("unit").is_some();
        let counts_something = caps.name("word").is_some_and(|w| {
            !FILLER_WORDS.contains(&w.as_str().to_lowercase().as_str()) && !is_year(num.as_str())
        });
        let is_decimal = num.as_str().contains('.');
        if !has_unit && !counts_something && !is_decimal {
            continue;
        }

        // Every number inside the claim (ranges carry two) must be known.
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let claim = match caps.name("word") {
            Some(word) if !counts_something => answer[whole.start()..word.start()].trim(),
            _ => whole.as_str().trim(),
        };
        claims_checked += 1;

        let grounded = number_re()
            .find_iter(claim)
            .filter_map(|m| parse_number(m.as_str()))
            .all(|value| known.iter().any(|k| same_number(*k, value)));

        if !grounded && !ungrounded.iter().any(|c| c == claim) {
            ungrounded.push(claim.to_string());
        }
    }

    GroundingReport {
        mode: GroundingMode::Quick,
        claims_checked,
        ungrounded,
        rejected: false,
    }
}

/// Caution line prepended when a flagged answer is rejected.
pub fn caution_notice(report: &GroundingReport) -> String {
    format!(
        "Caution: the following figures could not be traced to retrieved sources and should be verified: {}.",
        report.ungrounded.join(", ")
    )
}
