//! Query analysis: turning raw phrases into the token graph.
//!
//! The analyzer splits each phrase into break-separated terms, looks up
//! every break-respecting span of terms in the vocabulary store, runs the
//! candidates through the admission and penalty policy, synthesizes house
//! numbers and postcodes for digit terms the vocabulary does not know, and
//! freezes the resulting graph.
//!
//! One call, one graph: no state is shared between analyses except the
//! read-only collaborators. Span lookups are dispatched concurrently and
//! reassembled keyed by span text, so the result is identical regardless of
//! completion order.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::normalize::{Normalizer, NormalizerError};
use crate::policy::{self, AnalyzerConfig};
use crate::query::{
    BreakType, CategoryOp, Phrase, Query, Token, TokenRange, TokenType, SYNTHETIC_ID,
};
use crate::trace::{NullTrace, TraceSink};
use crate::vocab::{StoreError, VocabEntry, WordStore};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("vocabulary store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("normalizer failure: {0}")]
    Normalizer(#[from] NormalizerError),
    #[error("unknown token type '{0}' returned by vocabulary store")]
    UnknownTokenType(char),
    #[error("analysis cancelled")]
    Cancelled,
}

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// A candidate span awaiting lookup: where it sits and what joining its
/// breaks costs.
#[derive(Debug, Clone, Copy)]
struct SpanSite {
    range: TokenRange,
    break_penalty: f32,
}

/// The query analyzer. Cheap to clone; collaborators are shared.
#[derive(Clone)]
pub struct QueryAnalyzer {
    vocab: Arc<dyn WordStore>,
    normalizer: Arc<dyn Normalizer>,
    config: AnalyzerConfig,
}

impl QueryAnalyzer {
    pub fn new(vocab: Arc<dyn WordStore>, normalizer: Arc<dyn Normalizer>) -> Self {
        Self::with_config(vocab, normalizer, AnalyzerConfig::default())
    }

    pub fn with_config(
        vocab: Arc<dyn WordStore>,
        normalizer: Arc<dyn Normalizer>,
        config: AnalyzerConfig,
    ) -> Self {
        Self { vocab, normalizer, config }
    }

    /// Analyze the given phrases into a frozen token graph.
    pub async fn analyze_query(&self, phrases: Vec<Phrase>) -> AnalyzerResult<Query> {
        self.analyze_query_with(phrases, &NullTrace, &CancellationToken::new())
            .await
    }

    /// Analyze with an explicit trace sink and cancellation token. The sink
    /// is a pure observer; cancellation is honored at stage boundaries.
    pub async fn analyze_query_with(
        &self,
        phrases: Vec<Phrase>,
        trace: &dyn TraceSink,
        cancel: &CancellationToken,
    ) -> AnalyzerResult<Query> {
        trace.section("analyze query");

        let mut query = self.split_phrases(phrases, trace)?;
        debug!(
            phrases = query.source.len(),
            slots = query.num_token_slots(),
            "query split into terms"
        );
        if query.nodes.is_empty() {
            return Ok(query);
        }

        if cancel.is_cancelled() {
            return Err(AnalyzerError::Cancelled);
        }
        let spans = self.extract_words(&query);
        let looked_up = self.lookup_spans(&spans).await?;
        if cancel.is_cancelled() {
            return Err(AnalyzerError::Cancelled);
        }

        for ((term, sites), entries) in spans.iter().zip(&looked_up) {
            for site in sites {
                trace.span_lookup(site.range, term, entries.len());
                for entry in entries {
                    self.place_entry(&mut query, term, *site, entry, trace)?;
                }
            }
        }

        self.add_extra_tokens(&mut query, trace);
        policy::rerank_tokens(&mut query, &self.config);
        query.freeze();

        debug!(slots = query.num_token_slots(), "query analysis complete");
        trace.token_dump(&query);
        Ok(query)
    }

    /// Normalize and segment all phrases into the node arena. Phrases that
    /// normalize to nothing are dropped.
    fn split_phrases(
        &self,
        phrases: Vec<Phrase>,
        trace: &dyn TraceSink,
    ) -> AnalyzerResult<Query> {
        let mut query = Query::empty();
        for phrase in phrases {
            let normalized = self.normalizer.normalize(&phrase.text)?;
            let segments = self.normalizer.segments(&phrase.text)?;
            if segments.is_empty() {
                continue;
            }

            if query.nodes.is_empty() {
                query.begin(phrase.ptype);
            } else {
                // The boundary node opens the new phrase.
                let last = query.nodes.len() - 1;
                query.nodes[last].ptype = phrase.ptype;
            }
            for seg in segments {
                let penalty = policy::break_penalty(seg.btype);
                query.add_node(seg.btype, phrase.ptype, penalty, seg.lookup, seg.normalized);
            }

            trace.phrase(query.source.len(), phrase.ptype, &normalized);
            query.source.push(Phrase::new(phrase.ptype, normalized));
        }

        if let Some(last) = query.nodes.last_mut() {
            last.btype = BreakType::End;
            last.penalty = policy::break_penalty(BreakType::End);
        }
        Ok(query)
    }

    /// Collect every break-respecting span of terms, keyed by span text and
    /// sorted for deterministic dispatch. Spans never cross a phrase break
    /// and cover at most `max_span_words` terms.
    fn extract_words(&self, query: &Query) -> Vec<(String, Vec<SpanSite>)> {
        let mut words: HashMap<String, Vec<SpanSite>> = HashMap::new();
        for start in 0..query.num_token_slots() {
            let mut term = query.nodes[start + 1].term_lookup.clone();
            let mut penalty = 0.0;
            words.entry(term.clone()).or_default().push(SpanSite {
                range: TokenRange::new(start, start + 1),
                break_penalty: penalty,
            });

            for end in start + 2..=query.num_token_slots() {
                let interior = &query.nodes[end - 1];
                if interior.btype == BreakType::Phrase || end - start > self.config.max_span_words {
                    break;
                }
                penalty += interior.penalty;
                term.push(' ');
                term.push_str(&query.nodes[end].term_lookup);
                words.entry(term.clone()).or_default().push(SpanSite {
                    range: TokenRange::new(start, end),
                    break_penalty: penalty,
                });
            }
        }

        let mut words: Vec<(String, Vec<SpanSite>)> = words.into_iter().collect();
        words.sort_by(|a, b| a.0.cmp(&b.0));
        words
    }

    /// Dispatch all distinct span lookups concurrently. Results come back
    /// in dispatch order, so reassembly is deterministic.
    async fn lookup_spans(
        &self,
        spans: &[(String, Vec<SpanSite>)],
    ) -> AnalyzerResult<Vec<Vec<VocabEntry>>> {
        let lookups = spans.iter().map(|(term, _)| self.vocab.lookup(term));
        Ok(futures::future::try_join_all(lookups).await?)
    }

    /// Run one vocabulary row through the admission policy and place the
    /// resulting token, if admitted.
    fn place_entry(
        &self,
        query: &mut Query,
        term: &str,
        site: SpanSite,
        entry: &VocabEntry,
        trace: &dyn TraceSink,
    ) -> AnalyzerResult<()> {
        let Some(base_type) = policy::token_type_for(entry.kind) else {
            return Err(AnalyzerError::UnknownTokenType(entry.kind));
        };

        let penalty =
            entry.penalty + site.break_penalty + policy::shape_penalty(entry.kind, term, entry.word.as_deref());
        let mut token = Token {
            id: entry.id,
            penalty,
            lookup: entry.word.clone().unwrap_or_else(|| term.to_string()),
            count: site.range.len() as u32,
            op: None,
        };

        match base_type {
            TokenType::Qualifier => {
                let op = policy::category_op(entry.info.as_ref());
                token.op = op;
                let (ttype, admitted) = match op {
                    // Directional categories lead a phrase or nothing.
                    Some(CategoryOp::Near) => (
                        TokenType::NearItem,
                        query.nodes[site.range.start].is_phrase_start(),
                    ),
                    Some(CategoryOp::Filter) => (TokenType::Qualifier, true),
                    // Freestanding category words degrade to an
                    // unrestricted near-item rather than being dropped.
                    None => (TokenType::NearItem, true),
                };
                trace.admission(site.range, ttype, term, admitted);
                if admitted {
                    query.add_token(site.range, ttype, token);
                }
            }
            TokenType::Partial => {
                let admitted = site.range.len() == 1;
                trace.admission(site.range, TokenType::Partial, term, admitted);
                if admitted {
                    query.set_partial(site.range.start, token);
                }
            }
            other => {
                trace.admission(site.range, other, term, true);
                query.add_token(site.range, other, token);
            }
        }
        Ok(())
    }

    /// Synthesize tokens the vocabulary cannot provide: standalone digit
    /// terms become house numbers (short) or postcodes (long), so purely
    /// numeric input stays addressable by the ranking stage even with an
    /// empty vocabulary.
    fn add_extra_tokens(&self, query: &mut Query, trace: &dyn TraceSink) {
        for k in 1..query.nodes.len() {
            let term = query.nodes[k].term_lookup.clone();
            let before = query.nodes[k - 1].btype;
            let after = query.nodes[k].btype;
            if !policy::is_standalone_digit_term(&term, before, after) {
                continue;
            }

            let range = TokenRange::new(k - 1, k);
            if term.len() <= self.config.housenumber_max_digits
                && !query.nodes[k - 1].has_tokens(k, TokenType::Housenumber)
            {
                trace.admission(range, TokenType::Housenumber, &term, true);
                query.add_token(
                    range,
                    TokenType::Housenumber,
                    Token {
                        id: SYNTHETIC_ID,
                        penalty: policy::PENALTY_SYNTHETIC_HOUSENUMBER,
                        lookup: term.clone(),
                        count: 1,
                        op: None,
                    },
                );
            }
            if term.len() >= self.config.postcode_min_digits
                && !query.nodes[k - 1].has_tokens(k, TokenType::Postcode)
            {
                trace.admission(range, TokenType::Postcode, &term, true);
                query.add_token(
                    range,
                    TokenType::Postcode,
                    Token {
                        id: SYNTHETIC_ID,
                        penalty: policy::PENALTY_SYNTHETIC_POSTCODE,
                        lookup: term.clone(),
                        count: 1,
                        op: None,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RuleNormalizer;
    use crate::query::PhraseType;
    use crate::vocab::MemoryWordStore;

    fn analyzer(store: MemoryWordStore) -> QueryAnalyzer {
        QueryAnalyzer::new(Arc::new(store), Arc::new(RuleNormalizer::new()))
    }

    #[tokio::test]
    async fn span_extraction_respects_phrase_breaks() {
        let store = MemoryWordStore::new();
        store.add_word(1, "one two", 'W', Some("one two"), None);
        let ana = analyzer(store);

        // Same words, but split across a phrase boundary: the multi-word
        // span must not be looked up across it.
        let query = ana
            .analyze_query(vec![
                Phrase::new(PhraseType::Any, "one"),
                Phrase::new(PhraseType::Any, "two"),
            ])
            .await
            .unwrap();
        assert!(!query.nodes[0].has_tokens(2, TokenType::Word));

        let query = ana
            .analyze_query(vec![Phrase::new(PhraseType::Any, "one two")])
            .await
            .unwrap();
        assert!(query.nodes[0].has_tokens(2, TokenType::Word));
    }

    #[tokio::test]
    async fn multi_word_spans_accumulate_break_penalties() {
        let store = MemoryWordStore::new();
        store.add_word(1, "one two", 'W', Some("one two"), None);
        store.add_word(2, "one", 'W', Some("one"), None);
        let ana = analyzer(store);

        let query = ana
            .analyze_query(vec![Phrase::new(PhraseType::Any, "one two")])
            .await
            .unwrap();

        let single = &query.get_tokens(TokenRange::new(0, 1), TokenType::Word)[0];
        let joined = &query.get_tokens(TokenRange::new(0, 2), TokenType::Word)[0];
        assert!(joined.penalty > single.penalty);
        assert_eq!(joined.count, 2);
    }

    #[tokio::test]
    async fn cancelled_analysis_returns_error() {
        let ana = analyzer(MemoryWordStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ana
            .analyze_query_with(
                vec![Phrase::new(PhraseType::Any, "foo")],
                &NullTrace,
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(AnalyzerError::Cancelled)));
    }

    #[tokio::test]
    async fn unknown_vocabulary_tag_fails_the_call() {
        let store = MemoryWordStore::new();
        store.add_word(1, "foo", 'X', Some("foo"), None);
        let ana = analyzer(store);

        let result = ana
            .analyze_query(vec![Phrase::new(PhraseType::Any, "foo")])
            .await;
        assert!(matches!(result, Err(AnalyzerError::UnknownTokenType('X'))));
    }
}
