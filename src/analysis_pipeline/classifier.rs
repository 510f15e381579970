//! Reply parsing and deterministic fallbacks for threat level, keywords
//! and confidence.

use crate::models::ThreatLevel;

pub const MAX_KEYWORDS: usize = 5;

/// Statements that rule out a threat outright
const SAFE_PHRASES: &[&str] = &[
    "no security concerns detected",
    "normal scene",
    "no people or suspicious activity visible",
    "no suspicious activity",
    "all frames show normal",
    "normal activity",
    "no threats detected",
    "appears normal",
];

const CRITICAL_TERMS: &[&str] = &["weapon", "violence", "attack", "break-in", "forced entry"];
const HIGH_TERMS: &[&str] = &["suspicious", "unauthorized", "trespassing"];
const MEDIUM_TERMS: &[&str] = &["unusual", "loitering", "investigation"];

/// Words that negate a following term
const NEGATIONS: &[&str] = &["no", "not", "without", "nothing", "none"];
/// How many preceding words count as "nearby"
const NEGATION_WINDOW: usize = 3;

const KEYWORD_VOCABULARY: &[&str] = &[
    "normal", "suspicious", "unusual", "people", "person", "individual",
    "parking", "vehicle", "car", "building", "entrance", "activity",
    "walking", "running", "standing", "weapon", "threat", "security",
    "loitering", "trespassing", "breaking", "forced entry",
];

/// Map a backend reply to a level; CRITICAL wins over HIGH over MEDIUM,
/// anything else is LOW.
pub fn parse_threat_reply(reply: &str) -> ThreatLevel {
    let upper = reply.to_uppercase();
    if upper.contains("CRITICAL") {
        ThreatLevel::Critical
    } else if upper.contains("HIGH") {
        ThreatLevel::High
    } else if upper.contains("MEDIUM") {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

/// True if some occurrence of `term` is not preceded by a negation within
/// a few words
fn has_unnegated(text: &str, term: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = text[from..].find(term) {
        let at = from + pos;
        let negated = text[..at]
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .rev()
            .take(NEGATION_WINDOW)
            .any(|w| NEGATIONS.contains(&w));
        if !negated {
            return true;
        }
        from = at + term.len();
    }
    false
}

/// Keyword classifier used when the backend cannot classify
pub fn fallback_threat_level(text: &str) -> ThreatLevel {
    let lower = text.to_lowercase();

    if SAFE_PHRASES.iter().any(|p| lower.contains(p)) {
        return ThreatLevel::Low;
    }
    if CRITICAL_TERMS.iter().any(|t| lower.contains(t)) {
        return ThreatLevel::Critical;
    }
    if HIGH_TERMS.iter().any(|t| has_unnegated(&lower, t)) {
        return ThreatLevel::High;
    }
    if MEDIUM_TERMS.iter().any(|t| lower.contains(t)) {
        return ThreatLevel::Medium;
    }
    ThreatLevel::Low
}

/// Comma-separated reply to at most five lower-case keywords
pub fn parse_keywords(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| k.chars().count() > 2)
        .take(MAX_KEYWORDS)
        .collect()
}

/// Vocabulary scan used when the backend cannot extract keywords
pub fn fallback_keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    KEYWORD_VOCABULARY
        .iter()
        .filter(|k| lower.contains(*k))
        .take(MAX_KEYWORDS)
        .map(|k| k.to_string())
        .collect()
}

/// Heuristic confidence in [0,1]
pub fn confidence_score(base: f64, text: &str, keywords: &[String]) -> f64 {
    let len = text.chars().count();
    let mut score = base;
    if len > 100 {
        score += 0.2;
    }
    if len > 200 {
        score += 0.1;
    }
    if !keywords.is_empty() {
        score += 0.1;
    }
    if keywords.len() >= 3 {
        score += 0.1;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threat_reply() {
        assert_eq!(parse_threat_reply("critical"), ThreatLevel::Critical);
        assert_eq!(parse_threat_reply("Threat Level: HIGH."), ThreatLevel::High);
        assert_eq!(parse_threat_reply("medium"), ThreatLevel::Medium);
        assert_eq!(parse_threat_reply("LOW"), ThreatLevel::Low);
        assert_eq!(parse_threat_reply("I am not sure"), ThreatLevel::Low);
        // highest level named wins
        assert_eq!(parse_threat_reply("HIGH or CRITICAL"), ThreatLevel::Critical);
    }

    #[test]
    fn test_fallback_weapon_is_critical() {
        assert_eq!(
            fallback_threat_level("A person holding a weapon near the gate"),
            ThreatLevel::Critical
        );
    }

    #[test]
    fn test_fallback_safe_phrase_is_low() {
        assert_eq!(fallback_threat_level("no security concerns detected"), ThreatLevel::Low);
        assert_eq!(
            fallback_threat_level("Normal activity. Earlier a weapon-shaped shadow."),
            ThreatLevel::Low
        );
    }

    #[test]
    fn test_fallback_high_respects_nearby_negation() {
        assert_eq!(fallback_threat_level("A suspicious individual at the door"), ThreatLevel::High);
        assert_eq!(fallback_threat_level("There is nothing suspicious here"), ThreatLevel::Low);
        assert_eq!(fallback_threat_level("Person was not suspicious."), ThreatLevel::Low);
        assert_eq!(
            fallback_threat_level("No unauthorized entry. Later a suspicious car circled."),
            ThreatLevel::High
        );
    }

    #[test]
    fn test_fallback_medium_and_default() {
        assert_eq!(fallback_threat_level("Someone loitering by the fence"), ThreatLevel::Medium);
        assert_eq!(fallback_threat_level("A cat crossed the yard"), ThreatLevel::Low);
    }

    #[test]
    fn test_parse_keywords() {
        let kws = parse_keywords(" Person, walking ,DOOR, a, , package, vehicle, night, extra");
        assert_eq!(kws, vec!["person", "walking", "door", "package", "vehicle"]);
        assert!(parse_keywords("").is_empty());
    }

    #[test]
    fn test_fallback_keywords() {
        let kws = fallback_keywords("A person walking to the building entrance, normal activity, parked car");
        assert_eq!(kws, vec!["normal", "person", "car", "building", "entrance"]);
    }

    #[test]
    fn test_confidence_score() {
        let short = "ok";
        let long = "x".repeat(250);
        let three: Vec<String> = vec!["a".into(), "b".into(), "c".into()];

        assert_eq!(confidence_score(0.5, short, &[]), 0.5);
        assert!((confidence_score(0.5, &long, &three) - 1.0).abs() < 1e-9);
        assert!((confidence_score(0.5, &"x".repeat(150), &three[..1]) - 0.8).abs() < 1e-9);
        assert_eq!(confidence_score(0.7, &long, &three), 1.0);
    }
}
