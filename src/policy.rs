//! Token admission and penalty policy.
//!
//! Decides which vocabulary candidates are admissible at their position and
//! what penalty they carry. Penalties compose from three parts: the store's
//! own match penalty, the break penalties of the span, and a shape
//! adjustment per token kind. A final rerank pass adds cross-list penalties
//! where postcode and house-number interpretations compete for the same
//! span, so that competing types end up strictly ordered.

use serde_json::Value;

use crate::query::{BreakType, CategoryOp, Query, TokenType};

/// Penalty charged for joining a span across a break of the given type.
pub(crate) fn break_penalty(btype: BreakType) -> f32 {
    match btype {
        BreakType::Start | BreakType::End | BreakType::Phrase => 0.0,
        BreakType::Word => 0.1,
        BreakType::SoftPhrase | BreakType::Part => 0.2,
        BreakType::Token => 0.5,
    }
}

/// Penalty of a synthetic house-number token for an unknown digit term.
pub(crate) const PENALTY_SYNTHETIC_HOUSENUMBER: f32 = 0.5;
/// Penalty of a synthetic postcode token.
pub(crate) const PENALTY_SYNTHETIC_POSTCODE: f32 = 0.1;

/// Rerank: push competing house numbers below a postcode over the same span.
const RERANK_POSTCODE_VS_HOUSENUMBER: f32 = 0.39;
/// Rerank: push all other competing types below house numbers in turn.
const RERANK_POSTCODE_VS_OTHER: f32 = 0.49;
/// Rerank: short digit terms are house numbers first; competitors end up at
/// this level at least.
const RERANK_HOUSENUMBER_FLOOR: f32 = 0.5;

/// Thresholds and limits for query analysis.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Standalone digit terms at least this long count as postcodes.
    pub postcode_min_digits: usize,
    /// Standalone digit terms at most this long count as house numbers.
    pub housenumber_max_digits: usize,
    /// Maximum number of terms joined into one lookup span.
    pub max_span_words: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            postcode_min_digits: 5,
            housenumber_max_digits: 4,
            max_span_words: 20,
        }
    }
}

/// Map a raw store tag to a token type. `None` for tags outside the closed
/// enumeration.
pub(crate) fn token_type_for(kind: char) -> Option<TokenType> {
    match kind {
        'w' => Some(TokenType::Partial),
        'W' => Some(TokenType::Word),
        'H' => Some(TokenType::Housenumber),
        'P' => Some(TokenType::Postcode),
        'C' => Some(TokenType::Country),
        'S' => Some(TokenType::Qualifier),
        _ => None,
    }
}

/// Extract the category operator from an entry's metadata.
pub(crate) fn category_op(info: Option<&Value>) -> Option<CategoryOp> {
    match info.and_then(|v| v.get("op")).and_then(Value::as_str) {
        Some("in") | Some("near") => Some(CategoryOp::Near),
        Some(_) => Some(CategoryOp::Filter),
        None => None,
    }
}

/// Shape adjustment added to a candidate's penalty, derived from the token
/// text. `word` is the store's untransliterated word, when present.
pub(crate) fn shape_penalty(kind: char, token_text: &str, word: Option<&str>) -> f32 {
    match kind {
        'w' => 0.3,
        'W' => {
            let mut chars = token_text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if word.map_or(true, |w| w == token_text) => {
                    if c.is_ascii_digit() {
                        0.2
                    } else {
                        0.3
                    }
                }
                _ => 0.0,
            }
        }
        'H' => {
            let mut penalty = 0.1
                * token_text
                    .chars()
                    .filter(|c| *c != ' ' && !c.is_ascii_digit())
                    .count() as f32;
            if token_text.chars().all(|c| !c.is_ascii_digit()) {
                penalty += 0.2 * (token_text.chars().count().saturating_sub(1)) as f32;
            }
            penalty
        }
        'C' => {
            if token_text.chars().count() == 1 {
                0.3
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Whether a term qualifies for synthetic token treatment: all digits and
/// delimited by real word boundaries on both sides.
pub(crate) fn is_standalone_digit_term(term: &str, before: BreakType, after: BreakType) -> bool {
    !term.is_empty()
        && term.bytes().all(|b| b.is_ascii_digit())
        && !matches!(before, BreakType::Token | BreakType::Part)
        && !matches!(after, BreakType::Token | BreakType::Part)
}

/// Add penalties to token lists that depend on the presence of competing
/// lists over the same span. Applied once, after all tokens are placed.
pub(crate) fn rerank_tokens(query: &mut Query, config: &AnalyzerConfig) {
    // (node, end, type, amount) adjustments, collected before mutation so
    // the pass is independent of list order within a node.
    let mut adjustments: Vec<(usize, usize, TokenType, f32)> = Vec::new();

    for (i, node) in query.nodes.iter().enumerate() {
        for tlist in &node.starting {
            if tlist.ttype != TokenType::Postcode {
                continue;
            }
            let Some(first) = tlist.tokens.first() else { continue };
            let pc_len = first.lookup.chars().count();
            for other in &node.starting {
                if other.end != tlist.end || other.ttype == TokenType::Postcode {
                    continue;
                }
                if other.ttype == TokenType::Housenumber {
                    if pc_len > config.housenumber_max_digits {
                        adjustments.push((i, other.end, other.ttype, RERANK_POSTCODE_VS_HOUSENUMBER));
                    }
                } else {
                    adjustments.push((i, other.end, other.ttype, RERANK_POSTCODE_VS_OTHER));
                }
            }
        }
    }
    apply(query, &mut adjustments);

    for (i, node) in query.nodes.iter().enumerate() {
        for tlist in &node.starting {
            if tlist.ttype != TokenType::Housenumber {
                continue;
            }
            let Some(first) = tlist.tokens.first() else { continue };
            let text = &first.lookup;
            if text.chars().count() > 3 || !text.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }
            let push = (RERANK_HOUSENUMBER_FLOOR - first.penalty).max(0.0);
            for other in &node.starting {
                if other.end == tlist.end && other.ttype != TokenType::Housenumber {
                    adjustments.push((i, other.end, other.ttype, push));
                }
            }
        }
    }
    apply(query, &mut adjustments);
}

fn apply(query: &mut Query, adjustments: &mut Vec<(usize, usize, TokenType, f32)>) {
    for (i, end, ttype, amount) in adjustments.drain(..) {
        if let Some(tl) = query.nodes[i]
            .starting
            .iter_mut()
            .find(|tl| tl.end == end && tl.ttype == ttype)
        {
            tl.add_penalty(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn break_penalties_rank_splits() {
        assert_eq!(break_penalty(BreakType::Phrase), 0.0);
        assert!(break_penalty(BreakType::Word) < break_penalty(BreakType::Part));
        assert!(break_penalty(BreakType::Part) < break_penalty(BreakType::Token));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(token_type_for('W'), Some(TokenType::Word));
        assert_eq!(token_type_for('X'), None);
    }

    #[test]
    fn category_op_parsing() {
        assert_eq!(category_op(Some(&json!({"op": "in"}))), Some(CategoryOp::Near));
        assert_eq!(category_op(Some(&json!({"op": "near"}))), Some(CategoryOp::Near));
        assert_eq!(category_op(Some(&json!({"op": "-"}))), Some(CategoryOp::Filter));
        assert_eq!(category_op(Some(&json!({"count": 3}))), None);
        assert_eq!(category_op(None), None);
    }

    #[test]
    fn shape_penalty_single_char_words() {
        assert_eq!(shape_penalty('W', "3", Some("3")), 0.2);
        assert_eq!(shape_penalty('W', "a", Some("a")), 0.3);
        assert_eq!(shape_penalty('W', "23456", Some("23456")), 0.0);
        // Single-char abbreviations of a longer word stay unpenalized.
        assert_eq!(shape_penalty('W', "m", Some("main")), 0.0);
    }

    #[test]
    fn shape_penalty_housenumbers() {
        assert_eq!(shape_penalty('H', "23", Some("23")), 0.0);
        let with_letter = shape_penalty('H', "23a", Some("23a"));
        assert!((with_letter - 0.1).abs() < 1e-6);
        // Fully alphabetic "numbers" are heavily penalized.
        assert!(shape_penalty('H', "abc", Some("abc")) > 0.4);
    }

    #[test]
    fn standalone_digit_detection() {
        assert!(is_standalone_digit_term("466", BreakType::Word, BreakType::Word));
        assert!(!is_standalone_digit_term("34a", BreakType::Word, BreakType::Word));
        assert!(!is_standalone_digit_term("466", BreakType::Token, BreakType::Word));
        assert!(!is_standalone_digit_term("", BreakType::Word, BreakType::Word));
    }
}
