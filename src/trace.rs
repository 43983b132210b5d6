//! Diagnostic trace sinks for query analysis.
//!
//! The analyzer reports what it does — phrases discovered, spans queried,
//! admission decisions, the final token table — to an injectable
//! [`TraceSink`]. Sinks are pure observers: absence of a sink, or the sink
//! chosen, never changes the returned query. All hooks default to no-ops so
//! sinks implement only what they care about.

use std::fmt::Write as _;

use parking_lot::Mutex;

use crate::query::{PhraseType, Query, TokenRange, TokenType};

pub trait TraceSink: Send + Sync {
    /// A new analysis stage begins.
    fn section(&self, _title: &str) {}

    /// A phrase was normalized and segmented.
    fn phrase(&self, _index: usize, _ptype: PhraseType, _normalized: &str) {}

    /// A candidate span was looked up, returning `hits` vocabulary rows.
    fn span_lookup(&self, _range: TokenRange, _term: &str, _hits: usize) {}

    /// An admission decision for one candidate.
    fn admission(&self, _range: TokenRange, _ttype: TokenType, _term: &str, _admitted: bool) {}

    /// The finished graph, for dumping token tables.
    fn token_dump(&self, _query: &Query) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl TraceSink for NullTrace {}

/// Collects a plain-text trace. Drain with [`TextTrace::take`].
#[derive(Debug, Default)]
pub struct TextTrace {
    buf: Mutex<String>,
}

impl TextTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the collected trace and reset the buffer.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buf.lock())
    }
}

impl TraceSink for TextTrace {
    fn section(&self, title: &str) {
        let mut buf = self.buf.lock();
        let _ = writeln!(buf, "# {title}");
    }

    fn phrase(&self, index: usize, ptype: PhraseType, normalized: &str) {
        let mut buf = self.buf.lock();
        let _ = writeln!(buf, "phrase[{index}] {ptype:?}: '{normalized}'");
    }

    fn span_lookup(&self, range: TokenRange, term: &str, hits: usize) {
        let mut buf = self.buf.lock();
        let _ = writeln!(buf, "lookup ({},{}) '{term}': {hits} hits", range.start, range.end);
    }

    fn admission(&self, range: TokenRange, ttype: TokenType, term: &str, admitted: bool) {
        let mut buf = self.buf.lock();
        let verdict = if admitted { "admit" } else { "drop" };
        let _ = writeln!(
            buf,
            "{verdict} {ttype:?} ({},{}) '{term}'",
            range.start, range.end
        );
    }

    fn token_dump(&self, query: &Query) {
        let mut buf = self.buf.lock();
        let _ = writeln!(buf, "nodes: {}, slots: {}", query.nodes.len(), query.num_token_slots());
        for (i, node) in query.nodes.iter().enumerate() {
            if let Some(partial) = &node.partial {
                let _ = writeln!(buf, "  node {i} partial id={} p={:.2}", partial.id, partial.penalty);
            }
            for tl in &node.starting {
                for token in &tl.tokens {
                    let _ = writeln!(
                        buf,
                        "  node {i} {:?} ({i},{}) id={} p={:.2} '{}'",
                        tl.ttype, tl.end, token.id, token.penalty, token.lookup
                    );
                }
            }
        }
    }
}

/// Collects an HTML trace, one block per hook. Drain with [`HtmlTrace::take`].
#[derive(Debug, Default)]
pub struct HtmlTrace {
    buf: Mutex<String>,
}

impl HtmlTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the collected trace and reset the buffer.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buf.lock())
    }
}

impl TraceSink for HtmlTrace {
    fn section(&self, title: &str) {
        let mut buf = self.buf.lock();
        let _ = writeln!(buf, "<h2>{}</h2>", escape(title));
    }

    fn phrase(&self, index: usize, ptype: PhraseType, normalized: &str) {
        let mut buf = self.buf.lock();
        let _ = writeln!(
            buf,
            "<p>phrase[{index}] <b>{ptype:?}</b>: '{}'</p>",
            escape(normalized)
        );
    }

    fn span_lookup(&self, range: TokenRange, term: &str, hits: usize) {
        let mut buf = self.buf.lock();
        let _ = writeln!(
            buf,
            "<p>lookup ({},{}) '{}': {hits} hits</p>",
            range.start,
            range.end,
            escape(term)
        );
    }

    fn admission(&self, range: TokenRange, ttype: TokenType, term: &str, admitted: bool) {
        let mut buf = self.buf.lock();
        let verdict = if admitted { "admit" } else { "drop" };
        let _ = writeln!(
            buf,
            "<p>{verdict} <b>{ttype:?}</b> ({},{}) '{}'</p>",
            range.start,
            range.end,
            escape(term)
        );
    }

    fn token_dump(&self, query: &Query) {
        let mut buf = self.buf.lock();
        let _ = writeln!(buf, "<table><tr><th>node</th><th>type</th><th>span</th><th>id</th><th>penalty</th><th>word</th></tr>");
        for (i, node) in query.nodes.iter().enumerate() {
            for tl in &node.starting {
                for token in &tl.tokens {
                    let _ = writeln!(
                        buf,
                        "<tr><td>{i}</td><td>{:?}</td><td>({i},{})</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
                        tl.ttype,
                        tl.end,
                        token.id,
                        token.penalty,
                        escape(&token.lookup)
                    );
                }
            }
        }
        let _ = writeln!(buf, "</table>");
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_trace_collects_and_drains() {
        let trace = TextTrace::new();
        trace.section("analyze");
        trace.span_lookup(TokenRange::new(0, 1), "foo", 2);
        let out = trace.take();
        assert!(out.contains("# analyze"));
        assert!(out.contains("lookup (0,1) 'foo': 2 hits"));
        assert!(trace.take().is_empty());
    }

    #[test]
    fn html_trace_escapes_terms() {
        let trace = HtmlTrace::new();
        trace.span_lookup(TokenRange::new(0, 1), "a<b", 0);
        let out = trace.take();
        assert!(out.contains("a&lt;b"));
    }
}
