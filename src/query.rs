//! Query graph model: nodes, slots and token lists.
//!
//! A query is an ordered list of source phrases plus a flat arena of
//! [`QueryNode`]s indexed by dense position. Node `i` (for `i >= 1`) carries
//! the term between node `i-1` and node `i`; its break type is the break that
//! terminates that term. Candidate tokens spanning from node `i` to a later
//! node `j` live in a [`TokenList`] owned by node `i` and keyed by
//! `(j, token type)`. The graph is built once by the analyzer and read-only
//! afterwards.

use serde::Serialize;

/// Token id used for synthetic tokens that have no vocabulary entry
/// (unknown house numbers, parsed postcodes).
pub const SYNTHETIC_ID: i64 = 0;

/// Why a node boundary exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakType {
    /// Sentinel before the first term of the query.
    Start,
    /// Sentinel after the last term of the query.
    End,
    /// Boundary between two input phrases.
    Phrase,
    /// Weak phrase boundary (`:` separators inside a phrase).
    SoftPhrase,
    /// Whitespace between words.
    Word,
    /// `-` separators, e.g. hyphenated names.
    Part,
    /// Forced mid-word split from a transliteration rule.
    Token,
}

/// Phrase classification. Constrains which token types may appear
/// within the phrase: free text admits everything, structured fields
/// only what the field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PhraseType {
    Any,
    Amenity,
    Street,
    City,
    County,
    State,
    Postcode,
    Country,
}

impl PhraseType {
    /// Whether a token of the given type is legal inside this phrase.
    pub fn allows(self, ttype: TokenType) -> bool {
        use TokenType::*;
        match self {
            PhraseType::Any => true,
            PhraseType::Amenity => matches!(ttype, Word | Partial | NearItem | Qualifier),
            PhraseType::Street => matches!(ttype, Word | Partial | Housenumber),
            PhraseType::City | PhraseType::County | PhraseType::State => {
                matches!(ttype, Word | Partial)
            }
            PhraseType::Postcode => ttype == Postcode,
            PhraseType::Country => ttype == Country,
        }
    }
}

/// Token type tags. Closed enumeration: vocabulary rows with a tag outside
/// this set fail the analysis rather than being silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TokenType {
    /// Full word match.
    Word,
    /// Partial word, used for multi-term lookups.
    Partial,
    Housenumber,
    Postcode,
    Country,
    /// Category term relating to nearby entities ("pharmacy in ...").
    NearItem,
    /// Restricting filter term that can attach anywhere in the query.
    Qualifier,
}

/// Relation operator attached to category entries in the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CategoryOp {
    /// Directional relation ("in"/"near"): only meaningful when the
    /// category term leads a phrase.
    Near,
    /// Plain restricting filter, usable at any position.
    Filter,
}

/// One user-supplied text segment with its phrase classification.
/// After analysis the text is the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phrase {
    pub ptype: PhraseType,
    pub text: String,
}

impl Phrase {
    pub fn new(ptype: PhraseType, text: impl Into<String>) -> Self {
        Self { ptype, text: text.into() }
    }
}

/// A span over the node arena: covers the terms between node `start` and
/// node `end`, with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TokenRange {
    pub start: usize,
    pub end: usize,
}

impl TokenRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start < end);
        Self { start, end }
    }

    /// Number of token slots covered. Always at least 1.
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// One candidate vocabulary match (or synthetic placeholder) at a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    /// Vocabulary id, or [`SYNTHETIC_ID`] for synthetic tokens.
    pub id: i64,
    /// Final penalty after policy adjustments. Lower is better.
    pub penalty: f32,
    /// The word the token was looked up under, for diagnostics and reranking.
    pub lookup: String,
    /// How many query terms the token covers.
    pub count: u32,
    /// Category operator, populated for qualifier-derived tokens only.
    pub op: Option<CategoryOp>,
}

/// All candidates of one type spanning from the owning node to `end`,
/// sorted ascending by penalty once the graph is frozen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenList {
    pub end: usize,
    pub ttype: TokenType,
    pub tokens: Vec<Token>,
}

impl TokenList {
    /// Add `penalty` to every token in the list, keeping relative order.
    pub(crate) fn add_penalty(&mut self, penalty: f32) {
        for token in &mut self.tokens {
            token.penalty += penalty;
        }
    }
}

/// A position in the normalized, broken token stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryNode {
    /// The break terminating the term that leads into this node.
    pub btype: BreakType,
    /// Phrase classification of the phrase this node belongs to. On a
    /// phrase-boundary node this is the type of the phrase being opened.
    pub ptype: PhraseType,
    /// Penalty charged to spans that join across this break.
    pub penalty: f32,
    /// Transliterated lookup form of the term leading into this node.
    pub term_lookup: String,
    /// Normalized display form of the word the term came from.
    pub term_normalized: String,
    /// Candidate token lists starting at this node.
    pub starting: Vec<TokenList>,
    /// Best partial-word token spanning exactly to the adjacent node.
    pub partial: Option<Token>,
}

impl QueryNode {
    fn new(
        btype: BreakType,
        ptype: PhraseType,
        penalty: f32,
        term_lookup: String,
        term_normalized: String,
    ) -> Self {
        Self {
            btype,
            ptype,
            penalty,
            term_lookup,
            term_normalized,
            starting: Vec::new(),
            partial: None,
        }
    }

    /// Whether a span starting at this node starts a phrase.
    pub fn is_phrase_start(&self) -> bool {
        matches!(self.btype, BreakType::Start | BreakType::Phrase)
    }

    /// Tokens of the given type spanning from this node to `end`, if any.
    pub fn get_tokens(&self, end: usize, ttype: TokenType) -> Option<&[Token]> {
        self.starting
            .iter()
            .find(|tl| tl.end == end && tl.ttype == ttype)
            .map(|tl| tl.tokens.as_slice())
    }

    /// True iff this node owns a non-empty token list for `(end, ttype)`.
    pub fn has_tokens(&self, end: usize, ttype: TokenType) -> bool {
        self.get_tokens(end, ttype).is_some_and(|t| !t.is_empty())
    }
}

/// The analyzed query: source phrases plus the node/slot graph.
///
/// Constructed empty, populated by the analyzer, then frozen. Nothing is
/// shared across queries; the graph can be cloned or sent across threads
/// freely.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Query {
    pub source: Vec<Phrase>,
    pub nodes: Vec<QueryNode>,
}

impl Query {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    /// Count of node-to-node edges. Zero for an empty query.
    pub fn num_token_slots(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Append the start sentinel. Called once, before the first term.
    pub(crate) fn begin(&mut self, ptype: PhraseType) {
        debug_assert!(self.nodes.is_empty());
        self.nodes.push(QueryNode::new(
            BreakType::Start,
            ptype,
            0.0,
            String::new(),
            String::new(),
        ));
    }

    /// Append a term node. `btype` is the break terminating the term.
    pub(crate) fn add_node(
        &mut self,
        btype: BreakType,
        ptype: PhraseType,
        penalty: f32,
        term_lookup: String,
        term_normalized: String,
    ) {
        debug_assert!(!self.nodes.is_empty(), "begin() must run first");
        self.nodes
            .push(QueryNode::new(btype, ptype, penalty, term_lookup, term_normalized));
    }

    /// Attach a token to the `(range.end, ttype)` list of the range's start
    /// node. Tokens whose type the surrounding phrase does not admit are
    /// dropped silently; that is expected filtering, not a fault.
    pub(crate) fn add_token(&mut self, range: TokenRange, ttype: TokenType, token: Token) {
        let node = &mut self.nodes[range.start];
        if !node.ptype.allows(ttype) {
            return;
        }
        match node
            .starting
            .iter_mut()
            .find(|tl| tl.end == range.end && tl.ttype == ttype)
        {
            Some(tl) => tl.tokens.push(token),
            None => node.starting.push(TokenList {
                end: range.end,
                ttype,
                tokens: vec![token],
            }),
        }
    }

    /// Record a partial-word candidate for the single slot at `start`,
    /// keeping the lowest-penalty one.
    pub(crate) fn set_partial(&mut self, start: usize, token: Token) {
        let node = &mut self.nodes[start];
        if !node.ptype.allows(TokenType::Partial) {
            return;
        }
        match &node.partial {
            Some(existing) if existing.penalty <= token.penalty => {}
            _ => node.partial = Some(token),
        }
    }

    /// Tokens of the given type over `range`, or an empty slice.
    pub fn get_tokens(&self, range: TokenRange, ttype: TokenType) -> &[Token] {
        self.nodes[range.start]
            .get_tokens(range.end, ttype)
            .unwrap_or(&[])
    }

    /// Final ordering pass: lists by `(end, type)`, tokens by penalty.
    /// Both sorts are stable, so construction order breaks remaining ties.
    pub(crate) fn freeze(&mut self) {
        for node in &mut self.nodes {
            node.starting.sort_by_key(|tl| (tl.end, tl.ttype));
            for tl in &mut node.starting {
                tl.tokens.sort_by(|a, b| a.penalty.total_cmp(&b.penalty));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_token(id: i64, penalty: f32) -> Token {
        Token { id, penalty, lookup: "x".into(), count: 1, op: None }
    }

    fn two_slot_query(ptype: PhraseType) -> Query {
        let mut query = Query::empty();
        query.begin(ptype);
        query.add_node(BreakType::Word, ptype, 0.1, "foo".into(), "foo".into());
        query.add_node(BreakType::End, ptype, 0.0, "bar".into(), "bar".into());
        query
    }

    #[test]
    fn empty_query_has_no_slots() {
        assert_eq!(Query::empty().num_token_slots(), 0);
    }

    #[test]
    fn slot_count_is_node_count_minus_one() {
        let query = two_slot_query(PhraseType::Any);
        assert_eq!(query.nodes.len(), 3);
        assert_eq!(query.num_token_slots(), 2);
    }

    #[test]
    fn add_token_merges_into_existing_list() {
        let mut query = two_slot_query(PhraseType::Any);
        query.add_token(TokenRange::new(0, 1), TokenType::Word, word_token(1, 0.2));
        query.add_token(TokenRange::new(0, 1), TokenType::Word, word_token(2, 0.1));
        query.add_token(TokenRange::new(0, 2), TokenType::Word, word_token(3, 0.0));

        assert_eq!(query.nodes[0].starting.len(), 2);
        assert_eq!(query.get_tokens(TokenRange::new(0, 1), TokenType::Word).len(), 2);
        assert!(query.nodes[0].has_tokens(2, TokenType::Word));
        assert!(!query.nodes[0].has_tokens(2, TokenType::Housenumber));
    }

    #[test]
    fn phrase_type_gates_token_admission() {
        let mut query = two_slot_query(PhraseType::Postcode);
        query.add_token(TokenRange::new(0, 1), TokenType::Word, word_token(1, 0.0));
        assert!(query.nodes[0].starting.is_empty());

        query.add_token(
            TokenRange::new(0, 1),
            TokenType::Postcode,
            word_token(2, 0.0),
        );
        assert!(query.nodes[0].has_tokens(1, TokenType::Postcode));
    }

    #[test]
    fn set_partial_keeps_best_candidate() {
        let mut query = two_slot_query(PhraseType::Any);
        query.set_partial(0, word_token(1, 0.4));
        query.set_partial(0, word_token(2, 0.2));
        query.set_partial(0, word_token(3, 0.3));
        assert_eq!(query.nodes[0].partial.as_ref().map(|t| t.id), Some(2));
    }

    #[test]
    fn freeze_orders_lists_and_tokens() {
        let mut query = two_slot_query(PhraseType::Any);
        query.add_token(TokenRange::new(0, 2), TokenType::Word, word_token(1, 0.0));
        query.add_token(TokenRange::new(0, 1), TokenType::Housenumber, word_token(2, 0.0));
        query.add_token(TokenRange::new(0, 1), TokenType::Word, word_token(3, 0.5));
        query.add_token(TokenRange::new(0, 1), TokenType::Word, word_token(4, 0.1));
        query.freeze();

        let keys: Vec<(usize, TokenType)> = query.nodes[0]
            .starting
            .iter()
            .map(|tl| (tl.end, tl.ttype))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, TokenType::Word),
                (1, TokenType::Housenumber),
                (2, TokenType::Word),
            ]
        );
        let ids: Vec<i64> = query.nodes[0].starting[0].tokens.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn phrase_start_detection() {
        let mut query = Query::empty();
        query.begin(PhraseType::Any);
        query.add_node(BreakType::Phrase, PhraseType::Any, 0.0, "a".into(), "a".into());
        query.add_node(BreakType::Word, PhraseType::Any, 0.1, "b".into(), "b".into());
        query.add_node(BreakType::End, PhraseType::Any, 0.0, "c".into(), "c".into());

        assert!(query.nodes[0].is_phrase_start());
        assert!(query.nodes[1].is_phrase_start());
        assert!(!query.nodes[2].is_phrase_start());
    }
}
