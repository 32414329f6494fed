//! Company / instrument name matching
//!
//! Decides whether a spoken script name from a call transcript refers to
//! the same instrument as a trade's symbol or registered company name.
//! Layered checks, cheapest first: exact/substring, acronym, alphabetic
//! normalization, then token-set fuzzy similarity with corporate-suffix
//! stripping as a rescue. The matcher is symmetric in its arguments.

use std::collections::BTreeSet;

/// Corporate suffix words ignored by the acronym check
const SUFFIX_WORDS: [&str; 7] = [
    "LTD",
    "LIMITED",
    "INC",
    "PVT",
    "CORPORATION",
    "LLC",
    "PLC",
];

/// Terms stripped from both names before the rescue fuzzy pass
const STRIP_TERMS: [&str; 10] = [
    "EQ",
    "LIMITED",
    "limited",
    "CORPORATION",
    "LTD",
    "INC",
    "PVT",
    "LLC",
    "PLC",
    "LLP",
];

/// Similarity threshold (0-100) for the fuzzy pass
const FUZZY_THRESHOLD: f64 = 65.0;

/// True when `acronym` is the initials of the multi-word `phrase`
///
/// Suffix words are excluded from the initials; single-word phrases
/// never count as acronym sources.
pub fn is_acronym(acronym: &str, phrase: &str) -> bool {
    if phrase.split_whitespace().count() < 2 {
        return false;
    }

    let mut acr = acronym.to_uppercase();
    for suffix in SUFFIX_WORDS {
        acr = acr.replace(suffix, "");
    }
    let acr: String = acr.chars().filter(|c| !c.is_whitespace()).collect();
    if acr.is_empty() {
        return false;
    }

    let initials: String = phrase
        .to_uppercase()
        .split_whitespace()
        .filter(|w| !SUFFIX_WORDS.contains(w))
        .filter_map(|w| w.chars().next())
        .collect();

    acr == initials
}

/// Uppercase with everything but A-Z removed
fn normalize_alpha(name: &str) -> String {
    name.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase())
        .collect()
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Token-set similarity (0-100)
///
/// Compares the sorted unique-token intersection against each side's
/// remainder, so word order and repeated words don't penalize the score.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let tokens_b: BTreeSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&String> = tokens_a.intersection(&tokens_b).collect();
    let only_a: Vec<&String> = tokens_a.difference(&tokens_b).collect();
    let only_b: Vec<&String> = tokens_b.difference(&tokens_a).collect();

    if only_a.is_empty() && only_b.is_empty() {
        return 100.0;
    }

    let joined = |tokens: &[&String]| {
        tokens
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };

    let base = joined(&intersection);
    let with_a = if base.is_empty() {
        joined(&only_a)
    } else {
        format!("{} {}", base, joined(&only_a))
    };
    let with_b = if base.is_empty() {
        joined(&only_b)
    } else {
        format!("{} {}", base, joined(&only_b))
    };

    let mut best = similarity(&with_a, &with_b);
    if !base.is_empty() {
        best = best
            .max(similarity(&base, &with_a))
            .max(similarity(&base, &with_b));
    }
    best
}

/// Symmetric company-name match
pub fn match_company_names(name1: &str, name2: &str) -> bool {
    // Upstream uses "NA" as an explicit wildcard
    if name1 == "NA" || name2 == "NA" {
        return true;
    }
    if name1.is_empty() || name2.is_empty() {
        return false;
    }

    // Index names collide with everything fuzzy; require exact equality
    if name1.eq_ignore_ascii_case("nifty") || name2.eq_ignore_ascii_case("nifty") {
        return name1.eq_ignore_ascii_case(name2);
    }

    if is_acronym(name1, name2) || is_acronym(name2, name1) {
        return true;
    }

    let norm1 = normalize_alpha(name1);
    let norm2 = normalize_alpha(name2);
    if !norm1.is_empty()
        && !norm2.is_empty()
        && (norm1 == norm2 || norm1.contains(&norm2) || norm2.contains(&norm1))
    {
        return true;
    }

    if name1 == name2 || name1.contains(name2) || name2.contains(name1) {
        return true;
    }

    let strip_limited = |name: &str| name.replace("LIMITED", "").replace("limited", "");
    let mut score = token_set_ratio(&strip_limited(name1), &strip_limited(name2));

    if score < FUZZY_THRESHOLD {
        // Rescue pass with all corporate suffixes removed from both sides
        let strip_all = |name: &str| {
            let mut out = name.to_string();
            for term in STRIP_TERMS {
                out = out.replace(term, "");
            }
            out.trim().to_string()
        };
        score = token_set_ratio(&strip_all(name1), &strip_all(name2));
    }

    score >= FUZZY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acronym_matches_initials() {
        assert!(is_acronym("TCS", "Tata Consultancy Services Ltd"));
        assert!(is_acronym("HDFC", "Housing Development Finance Company"));
        // Suffix words never contribute initials
        assert!(is_acronym("HDF", "Housing Development Finance Corporation"));
        assert!(!is_acronym("TCS", "Reliance Industries"));
        // Single-word phrases never form acronyms
        assert!(!is_acronym("R", "Reliance"));
    }

    #[test]
    fn matcher_accepts_acronyms_both_ways() {
        assert!(match_company_names("TCS", "Tata Consultancy Services Ltd"));
        assert!(match_company_names("Tata Consultancy Services Ltd", "TCS"));
        assert!(!match_company_names("TCS", "Reliance Industries"));
    }

    #[test]
    fn matcher_is_symmetric() {
        let pairs = [
            ("TCS", "Tata Consultancy Services Ltd"),
            ("Reliance Industries", "RELIANCE INDUSTRIES LIMITED"),
            ("Infosys", "Wipro"),
            ("nifty", "NIFTY"),
            ("nifty", "Nifty Bank"),
            ("", "Reliance"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                match_company_names(a, b),
                match_company_names(b, a),
                "asymmetric for ({a:?}, {b:?})"
            );
        }
    }

    #[test]
    fn na_is_wildcard_and_empty_never_matches() {
        assert!(match_company_names("NA", "anything"));
        assert!(!match_company_names("", "Reliance"));
        assert!(!match_company_names("Reliance", ""));
    }

    #[test]
    fn nifty_requires_exact_equality() {
        assert!(match_company_names("nifty", "NIFTY"));
        assert!(!match_company_names("nifty", "Nifty Bank"));
    }

    #[test]
    fn suffix_stripping_rescues_low_scores() {
        assert!(match_company_names(
            "RELIANCE INDUSTRIES",
            "RELIANCE INDUSTRIES LIMITED"
        ));
        assert!(match_company_names("SBIN", "State Bank India Nominee"));
    }

    #[test]
    fn token_set_ratio_ignores_word_order() {
        assert_eq!(token_set_ratio("bank state", "state bank"), 100.0);
        assert!(token_set_ratio("state bank of india", "state bank") >= 65.0);
        assert!(token_set_ratio("alpha", "omega") < 65.0);
    }
}
