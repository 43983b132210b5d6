//! Debug CLI: analyze a query against a SQLite word store and dump the
//! resulting token graph.
//!
//! Comma-separated input splits into phrases, mirroring how a search
//! frontend would pass structured input:
//!
//!     waypost-analyze --db words.sqlite "main st 12, springfield"

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use waypost::{Phrase, PhraseType, QueryAnalyzer, RuleNormalizer, SqliteWordStore, TextTrace};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "waypost-analyze", about = "Analyze a search query into a token graph")]
struct Args {
    /// Path to the SQLite word database.
    #[arg(long)]
    db: std::path::PathBuf,

    /// The query text; commas separate phrases.
    query: String,

    /// Print the full analysis trace to stderr.
    #[arg(long)]
    trace: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = SqliteWordStore::open(&args.db)
        .with_context(|| format!("opening word database {}", args.db.display()))?;
    let analyzer = QueryAnalyzer::new(Arc::new(store), Arc::new(RuleNormalizer::new()));

    let phrases: Vec<Phrase> = args
        .query
        .split(',')
        .map(|text| Phrase::new(PhraseType::Any, text))
        .collect();

    let sink = TextTrace::new();
    let query = analyzer
        .analyze_query_with(phrases, &sink, &CancellationToken::new())
        .await
        .context("query analysis failed")?;

    if args.trace {
        eprint!("{}", sink.take());
    }

    println!(
        "{} phrase(s), {} slot(s)",
        query.source.len(),
        query.num_token_slots()
    );
    for (i, node) in query.nodes.iter().enumerate() {
        if node.term_lookup.is_empty() {
            println!("node {i} [{:?}]", node.btype);
        } else {
            println!("node {i} '{}' [{:?}]", node.term_lookup, node.btype);
        }
        if let Some(partial) = &node.partial {
            println!("    partial id={} penalty={:.2}", partial.id, partial.penalty);
        }
        for tl in &node.starting {
            for token in &tl.tokens {
                println!(
                    "    {:?} ({i},{}) id={} penalty={:.2} '{}'",
                    tl.ttype, tl.end, token.id, token.penalty, token.lookup
                );
            }
        }
    }

    Ok(())
}
