//! waypost — query analysis for place-name search.
//!
//! Takes free-text user input split into phrases, normalizes and
//! transliterates it, looks up candidate vocabulary matches (words,
//! partial-word fragments, house numbers, postcodes, qualifiers) and builds
//! a token-slot graph over the normalized text, ready for a downstream
//! ranking stage to enumerate interpretations.

pub mod analyzer;
pub mod database;
pub mod normalize;
mod policy;
pub mod query;
pub mod trace;
pub mod vocab;

pub use analyzer::{AnalyzerError, AnalyzerResult, QueryAnalyzer};
pub use database::SqliteWordStore;
pub use normalize::{Normalizer, NormalizerError, RuleNormalizer, Segment};
pub use policy::AnalyzerConfig;
pub use query::{
    BreakType, CategoryOp, Phrase, PhraseType, Query, QueryNode, Token, TokenList, TokenRange,
    TokenType, SYNTHETIC_ID,
};
pub use trace::{HtmlTrace, NullTrace, TextTrace, TraceSink};
pub use vocab::{MemoryWordStore, StoreError, VocabEntry, WordStore};
