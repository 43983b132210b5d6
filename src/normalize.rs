//! Phrase normalization and transliteration.
//!
//! The analyzer consumes phrases through the [`Normalizer`] trait: case
//! folding for the display form, transliteration to the lookup form, and
//! segmentation into terms with trailing break types. [`RuleNormalizer`] is
//! the built-in implementation: a diacritic folding table plus configured
//! per-character replacement rules. A rule whose output ends in a space
//! forces a token break right after the rewritten character, so a single
//! input word can materialize several graph nodes.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::query::BreakType;

#[derive(Error, Debug)]
pub enum NormalizerError {
    #[error("normalization backend failure: {0}")]
    Backend(String),
}

/// One term of a segmented phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Transliterated lookup form. Never empty.
    pub lookup: String,
    /// Normalized form of the word the term came from. Fragments produced
    /// by a forced split all carry the whole source word.
    pub normalized: String,
    /// The break terminating this term. The final segment of a phrase
    /// always carries [`BreakType::Phrase`]; the analyzer rewrites the very
    /// last break of a query to [`BreakType::End`].
    pub btype: BreakType,
}

/// Maps raw phrase text to normalized and transliterated forms.
///
/// Must be deterministic for identical input and identical configured rules,
/// and safe for concurrent use from multiple in-flight analyses.
pub trait Normalizer: Send + Sync {
    /// Case-fold and whitespace-collapse the raw phrase text.
    fn normalize(&self, raw: &str) -> Result<String, NormalizerError>;

    /// Split the raw phrase into lookup terms with trailing break types.
    /// Phrases that normalize to nothing yield an empty segment list.
    fn segments(&self, raw: &str) -> Result<Vec<Segment>, NormalizerError>;
}

/// Folding table applied to characters with no configured rule.
static DIACRITIC_FOLDS: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('à', "a"), ('á', "a"), ('â', "a"), ('ã', "a"), ('å', "a"),
        ('ç', "c"),
        ('è', "e"), ('é', "e"), ('ê', "e"), ('ë', "e"),
        ('ì', "i"), ('í', "i"), ('î', "i"), ('ï', "i"),
        ('ñ', "n"),
        ('ò', "o"), ('ó', "o"), ('ô', "o"), ('õ', "o"),
        ('ù', "u"), ('ú', "u"), ('û', "u"),
        ('ý', "y"), ('ÿ', "y"),
        ('æ', "ae"), ('ø', "o"), ('œ', "oe"), ('ß', "ss"),
        ('ä', "a"), ('ö', "o"), ('ü', "u"),
    ])
});

/// Rule-driven normalizer: lowercase, fold diacritics, apply replacement
/// rules. Rules take precedence over the folding table.
#[derive(Debug, Clone, Default)]
pub struct RuleNormalizer {
    rules: HashMap<char, String>,
}

impl RuleNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transliteration rule rewriting `from` to `to`. A trailing
    /// space in `to` forces a token break after the rewritten character.
    pub fn with_rule(mut self, from: char, to: &str) -> Self {
        self.rules.insert(from, to.to_string());
        self
    }

    fn transliterate(&self, term: &str) -> String {
        let mut out = String::with_capacity(term.len());
        for ch in term.chars() {
            if let Some(rep) = self.rules.get(&ch) {
                out.push_str(rep);
            } else if let Some(rep) = DIACRITIC_FOLDS.get(&ch) {
                out.push_str(rep);
            } else {
                out.push(ch);
            }
        }
        out
    }

    /// Push the fragments of one normalized word onto `segs`. The word may
    /// transliterate to several space-separated fragments; all but the last
    /// get a token break.
    fn flush_word(&self, segs: &mut Vec<Segment>, word: &str, trailing: BreakType) {
        let lookup = self.transliterate(word);
        let fragments: Vec<&str> = lookup.split(' ').filter(|f| !f.is_empty()).collect();
        let last = fragments.len().saturating_sub(1);
        for (i, fragment) in fragments.iter().enumerate() {
            segs.push(Segment {
                lookup: (*fragment).to_string(),
                normalized: word.to_string(),
                btype: if i == last { trailing } else { BreakType::Token },
            });
        }
    }
}

impl Normalizer for RuleNormalizer {
    fn normalize(&self, raw: &str) -> Result<String, NormalizerError> {
        let mut out = String::with_capacity(raw.len());
        let mut pending_space = false;
        for ch in raw.trim().chars() {
            if ch.is_whitespace() {
                pending_space = !out.is_empty();
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.extend(ch.to_lowercase());
        }
        Ok(out)
    }

    fn segments(&self, raw: &str) -> Result<Vec<Segment>, NormalizerError> {
        let norm = self.normalize(raw)?;
        let mut segs = Vec::new();
        let mut word = String::new();
        for ch in norm.chars() {
            let trailing = match ch {
                ' ' => Some(BreakType::Word),
                '-' => Some(BreakType::Part),
                ':' => Some(BreakType::SoftPhrase),
                _ => None,
            };
            match trailing {
                Some(btype) => {
                    if !word.is_empty() {
                        self.flush_word(&mut segs, &word, btype);
                        word.clear();
                    }
                }
                None => word.push(ch),
            }
        }
        if !word.is_empty() {
            self.flush_word(&mut segs, &word, BreakType::Phrase);
        }
        // The stream for one phrase always ends on a phrase break, whatever
        // separator happened to come last.
        if let Some(last) = segs.last_mut() {
            last.btype = BreakType::Phrase;
        }
        Ok(segs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_whitespace() {
        let norm = RuleNormalizer::new();
        assert_eq!(norm.normalize("  foo   BAR ").unwrap(), "foo bar");
        assert_eq!(norm.normalize("\t").unwrap(), "");
    }

    #[test]
    fn segments_split_on_separators() {
        let norm = RuleNormalizer::new();
        let segs = norm.segments("Main St:Springfield").unwrap();
        let parts: Vec<(&str, BreakType)> =
            segs.iter().map(|s| (s.lookup.as_str(), s.btype)).collect();
        assert_eq!(
            parts,
            vec![
                ("main", BreakType::Word),
                ("st", BreakType::SoftPhrase),
                ("springfield", BreakType::Phrase),
            ]
        );
    }

    #[test]
    fn hyphen_produces_part_break() {
        let norm = RuleNormalizer::new();
        let segs = norm.segments("Baden-Baden").unwrap();
        assert_eq!(segs[0].btype, BreakType::Part);
        assert_eq!(segs[1].btype, BreakType::Phrase);
        assert_eq!(segs[0].normalized, "baden");
    }

    #[test]
    fn diacritics_fold_by_default() {
        let norm = RuleNormalizer::new();
        let segs = norm.segments("Café").unwrap();
        assert_eq!(segs[0].lookup, "cafe");
        assert_eq!(segs[0].normalized, "café");
    }

    #[test]
    fn rule_with_trailing_space_forces_token_break() {
        let norm = RuleNormalizer::new().with_rule('ä', "ä ");
        let segs = norm.segments("mäfo").unwrap();
        let parts: Vec<(&str, BreakType)> =
            segs.iter().map(|s| (s.lookup.as_str(), s.btype)).collect();
        assert_eq!(
            parts,
            vec![("mä", BreakType::Token), ("fo", BreakType::Phrase)]
        );
        // Both fragments point back at the same source word.
        assert_eq!(segs[0].normalized, "mäfo");
        assert_eq!(segs[1].normalized, "mäfo");
    }

    #[test]
    fn rules_take_precedence_over_folding() {
        let norm = RuleNormalizer::new().with_rule('ä', "ä ");
        let segs = norm.segments("über mä").unwrap();
        assert_eq!(segs[0].lookup, "uber");
        assert_eq!(segs[1].lookup, "mä");
    }

    #[test]
    fn empty_phrase_yields_no_segments() {
        let norm = RuleNormalizer::new();
        assert!(norm.segments("   ").unwrap().is_empty());
    }
}
