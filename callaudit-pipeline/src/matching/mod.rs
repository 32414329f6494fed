//! Trade-to-call matching engine
//!
//! Links each structured trade record to the call recording in which it
//! was verbally confirmed and classifies the confirmation strength
//! across three independent dimensions: script (instrument), price and
//! quantity. Pure logic operates on an in-memory `BatchSnapshot`; the
//! passes in `engine` and `second_pass` persist the verdicts.

pub mod company;
pub mod engine;
pub mod second_pass;
pub mod snapshot;

pub use snapshot::BatchSnapshot;

/// Which side of the order timestamp the matched call sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Pre,
    Post,
}

/// Primary finding for a trade (tag1); closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    PreTradeFound,
    PostTradeFound,
    NoPreTradeFound,
    NoPostTradeFound,
    NoCallRecordFound,
    UnsupportedLanguage,
    NonObservatoryCall,
}

impl Finding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Finding::PreTradeFound => "Pre trade found",
            Finding::PostTradeFound => "Post trade found",
            Finding::NoPreTradeFound => "No pre trade found",
            Finding::NoPostTradeFound => "No Post trade found",
            Finding::NoCallRecordFound => "No call record found",
            Finding::UnsupportedLanguage => "Unsupported Language",
            Finding::NonObservatoryCall => "Non observatory call",
        }
    }

    fn found(side: TradeSide) -> Finding {
        match side {
            TradeSide::Pre => Finding::PreTradeFound,
            TradeSide::Post => Finding::PostTradeFound,
        }
    }

    fn not_found(side: TradeSide) -> Finding {
        match side {
            TradeSide::Pre => Finding::NoPreTradeFound,
            TradeSide::Post => Finding::NoPostTradeFound,
        }
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three confirmation dimensions for one (trade, call) pairing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchFlags {
    pub script: bool,
    pub price: bool,
    pub quantity: bool,
}

impl MatchFlags {
    pub fn score(&self) -> u8 {
        self.script as u8 + self.price as u8 + self.quantity as u8
    }

    /// Human-readable list of the dimensions that did NOT match
    pub fn missing_label(&self) -> String {
        let missing: Vec<&str> = [
            (!self.script).then_some("Script"),
            (!self.price).then_some("Price"),
            (!self.quantity).then_some("Quantity"),
        ]
        .into_iter()
        .flatten()
        .collect();

        match missing.as_slice() {
            [] => String::new(),
            [one] => (*one).to_string(),
            [a, b] => format!("{} and {}", a, b),
            _ => "Script, Price and Quantity".to_string(),
        }
    }
}

/// Full three-part classification label for a trade-call pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tag1: Finding,
    /// Match quality ("Details matching" / "Details not matching" / "")
    pub tag2: &'static str,
    /// Mismatched dimension(s), empty when everything matched
    pub tag3: String,
}

impl Classification {
    pub fn bare(tag1: Finding) -> Self {
        Self {
            tag1,
            tag2: "",
            tag3: String::new(),
        }
    }
}

/// Map the three flags to the deterministic tag triple
///
/// All true -> trade found / details matching. Exactly one false ->
/// trade found / details not matching / that dimension. Two false ->
/// still "trade found" when only script matched, otherwise the weaker
/// "No <side> trade found". All false -> non observatory call.
pub fn classify(flags: MatchFlags, side: TradeSide) -> (u8, Classification) {
    let score = flags.score();
    let classification = match score {
        3 => Classification {
            tag1: Finding::found(side),
            tag2: "Details matching",
            tag3: String::new(),
        },
        2 => Classification {
            tag1: Finding::found(side),
            tag2: "Details not matching",
            tag3: flags.missing_label(),
        },
        1 => Classification {
            tag1: if flags.script {
                Finding::found(side)
            } else {
                Finding::not_found(side)
            },
            tag2: "Details not matching",
            tag3: flags.missing_label(),
        },
        _ => Classification::bare(Finding::NonObservatoryCall),
    };
    (score, classification)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_tag1_stays_in_closed_set() {
        let all_tags = [
            "Pre trade found",
            "Post trade found",
            "No pre trade found",
            "No Post trade found",
            "No call record found",
            "Unsupported Language",
            "Non observatory call",
        ];
        for script in [false, true] {
            for price in [false, true] {
                for quantity in [false, true] {
                    for side in [TradeSide::Pre, TradeSide::Post] {
                        let flags = MatchFlags {
                            script,
                            price,
                            quantity,
                        };
                        let (_, c) = classify(flags, side);
                        assert!(all_tags.contains(&c.tag1.as_str()));
                    }
                }
            }
        }
    }

    #[test]
    fn all_true_is_details_matching() {
        let flags = MatchFlags {
            script: true,
            price: true,
            quantity: true,
        };
        let (score, c) = classify(flags, TradeSide::Pre);
        assert_eq!(score, 3);
        assert_eq!(c.tag1, Finding::PreTradeFound);
        assert_eq!(c.tag2, "Details matching");
        assert_eq!(c.tag3, "");
    }

    #[test]
    fn one_false_names_the_dimension() {
        let flags = MatchFlags {
            script: true,
            price: true,
            quantity: false,
        };
        let (score, c) = classify(flags, TradeSide::Post);
        assert_eq!(score, 2);
        assert_eq!(c.tag1, Finding::PostTradeFound);
        assert_eq!(c.tag3, "Quantity");
    }

    #[test]
    fn script_only_still_counts_as_found() {
        let flags = MatchFlags {
            script: true,
            price: false,
            quantity: false,
        };
        let (_, c) = classify(flags, TradeSide::Pre);
        assert_eq!(c.tag1, Finding::PreTradeFound);
        assert_eq!(c.tag3, "Price and Quantity");
    }

    #[test]
    fn price_only_is_weaker_finding() {
        let flags = MatchFlags {
            script: false,
            price: true,
            quantity: false,
        };
        let (_, c) = classify(flags, TradeSide::Post);
        assert_eq!(c.tag1, Finding::NoPostTradeFound);
        assert_eq!(c.tag3, "Script and Quantity");
    }

    #[test]
    fn all_false_is_non_observatory() {
        let (score, c) = classify(MatchFlags::default(), TradeSide::Pre);
        assert_eq!(score, 0);
        assert_eq!(c.tag1, Finding::NonObservatoryCall);
        assert_eq!(c.tag2, "");
    }
}
