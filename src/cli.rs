//! Development and smoke-testing harness for the retrieval core.
//!
//! Not a product surface: a real deployment embeds this crate as a library
//! behind its own service. This binary exists so a developer can build a
//! BM25 index from a chunk dump and issue a query from a terminal without
//! writing a throwaway program first.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::bm25::Bm25Index;
use crate::cache::SemanticCache;
use crate::chunk::Chunk;
use crate::embedding::{DEFAULT_DIMENSIONS, Embedder, FallbackEmbedder, HttpEmbedder};
use crate::error::{Error, Result};
use crate::llm::{HttpLlmClient, LlmClient, NullLlmClient};
use crate::pipeline::{RetrievalConfig, RetrievalPipeline, RetrievalResult};
use crate::query_enhancer::QueryEnhancer;
use crate::reranker::Reranker;
use crate::vector_store::InMemoryVectorStore;

/// Output format options, shared across every subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Parses a format name, defaulting to `Text` for anything unrecognized.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// A BM25 index and queryable retrieval core over tiered administrative-
/// procedure chunks.
#[derive(Parser, Debug)]
#[command(name = "tthc-retrieval", version, about)]
pub struct Cli {
    /// Output format: `text` or `json`.
    #[arg(long, global = true, default_value = "text")]
    pub format: String,

    /// Enables debug-level tracing output on stderr.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Builds a BM25 index from a chunk dump and writes it to disk.
    Index {
        /// Path to a JSON array of chunks.
        #[arg(long)]
        chunks: PathBuf,
        /// Where to write the serialized index.
        #[arg(long)]
        output: PathBuf,
    },
    /// Runs one question through the full retrieval pipeline.
    Query {
        /// Path to a JSON array of chunks (also used to populate the
        /// in-memory vector store for this run).
        #[arg(long)]
        chunks: PathBuf,
        /// Path to a previously built BM25 index (`index` subcommand). If
        /// omitted, or unreadable, one is built from `chunks` in memory.
        #[arg(long)]
        bm25_index: Option<PathBuf>,
        /// The question to ask.
        question: String,
        /// Base URL of an embedding service implementing `/api/embeddings`.
        /// If omitted, a deterministic dependency-free embedder is used.
        #[arg(long, env = "TTHC_EMBEDDER_URL")]
        embedder_url: Option<String>,
        /// Embedding model name, passed through to the embedding service.
        #[arg(long, default_value = "bge-m3")]
        embedder_model: String,
        /// Base URL of a generation service implementing `/api/generate`.
        /// If omitted, query understanding falls back to its heuristics.
        #[arg(long, env = "TTHC_LLM_URL")]
        llm_url: Option<String>,
        /// Generation model name, passed through to the generation service.
        #[arg(long, default_value = "llama3")]
        llm_model: String,
    },
}

fn load_chunks(path: &PathBuf) -> Result<Vec<Chunk>> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("failed to read {}: {e}", path.display()),
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::Config {
        message: format!("failed to parse {} as a chunk array: {e}", path.display()),
    })
}

fn build_embedder(embedder_url: Option<&str>, embedder_model: &str) -> Arc<dyn Embedder> {
    match embedder_url {
        Some(url) => Arc::new(HttpEmbedder::new(url, embedder_model, DEFAULT_DIMENSIONS)),
        None => Arc::new(FallbackEmbedder::new(DEFAULT_DIMENSIONS)),
    }
}

fn build_llm(llm_url: Option<&str>, llm_model: &str) -> Arc<dyn LlmClient> {
    match llm_url {
        Some(url) => Arc::new(HttpLlmClient::new(url, llm_model)),
        None => Arc::new(NullLlmClient),
    }
}

fn cmd_index(chunks_path: &PathBuf, output: &PathBuf) -> Result<String> {
    let chunks = load_chunks(chunks_path)?;
    let mut index = Bm25Index::default();
    index.build_index(&chunks)?;
    index.save_index(output)?;
    Ok(format!("indexed {} chunks into {}\n", chunks.len(), output.display()))
}

fn cmd_query(
    chunks_path: &PathBuf,
    bm25_index_path: Option<&PathBuf>,
    question: &str,
    embedder_url: Option<&str>,
    embedder_model: &str,
    llm_url: Option<&str>,
    llm_model: &str,
) -> Result<RetrievalResult> {
    let chunks = load_chunks(chunks_path)?;
    let embedder = build_embedder(embedder_url, embedder_model);
    let llm = build_llm(llm_url, llm_model);

    let store = InMemoryVectorStore::new(embedder.dimensions());
    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    let embeddings = embedder.embed_batch(&contents)?;
    for (chunk, embedding) in chunks.iter().zip(embeddings) {
        store.upsert(chunk.clone(), embedding)?;
    }

    let bm25 = bm25_index_path
        .and_then(|path| Bm25Index::load_index(path).ok())
        .or_else(|| {
            let mut index = Bm25Index::default();
            index.build_index(&chunks).ok().map(|()| index)
        });

    let reranker = Reranker::with_defaults(Arc::clone(&embedder));
    let cache = Some(SemanticCache::new(256, Duration::from_secs(3600), 0.92));

    let pipeline = RetrievalPipeline::new(
        Arc::new(store),
        embedder,
        QueryEnhancer::new(llm),
        bm25,
        chunks,
        Some(reranker),
        cache,
        RetrievalConfig::default(),
    );

    pipeline.retrieve(question)
}

/// Dispatches `cli.command` and renders the result for `cli.format`.
///
/// # Errors
///
/// Returns an error if the chunk dump can't be read/parsed, or any
/// collaborator (BM25, vector store, embedder) fails.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    match &cli.command {
        Commands::Index { chunks, output } => cmd_index(chunks, output),
        Commands::Query {
            chunks,
            bm25_index,
            question,
            embedder_url,
            embedder_model,
            llm_url,
            llm_model,
        } => {
            let result = cmd_query(
                chunks,
                bm25_index.as_ref(),
                question,
                embedder_url.as_deref(),
                embedder_model,
                llm_url.as_deref(),
                llm_model,
            )?;
            Ok(format_query_result(&result, format))
        }
    }
}

#[derive(Serialize)]
struct QueryResultJson<'a> {
    query: &'a str,
    intent: &'a str,
    confidence: f64,
    search_type: &'a str,
    chunk_count: usize,
    context: &'a str,
}

fn format_query_result(result: &RetrievalResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format_query_result_text(result),
        OutputFormat::Json => {
            let json = QueryResultJson {
                query: &result.query,
                intent: intent_label(result.intent),
                confidence: result.confidence,
                search_type: &result.metadata.search_type,
                chunk_count: result.retrieved_chunks.len(),
                context: &result.context,
            };
            serde_json::to_string_pretty(&json).unwrap_or_default()
        }
    }
}

fn intent_label(intent: crate::query_enhancer::Intent) -> &'static str {
    use crate::query_enhancer::Intent;
    match intent {
        Intent::Documents => "documents",
        Intent::Requirements => "requirements",
        Intent::Process => "process",
        Intent::Legal => "legal",
        Intent::Timeline => "timeline",
        Intent::Fees => "fees",
        Intent::Location => "location",
        Intent::Overview => "overview",
    }
}

fn format_query_result_text(result: &RetrievalResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "intent:       {}", intent_label(result.intent));
    let _ = writeln!(out, "search_type:  {}", result.metadata.search_type);
    let _ = writeln!(out, "confidence:   {:.3}", result.confidence);
    let _ = writeln!(out, "chunks:       {}", result.retrieved_chunks.len());
    let _ = writeln!(out);
    out.push_str(&result.context);
    out
}

/// Renders an error for `format`.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => error.to_string(),
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct ErrorJson<'a> {
                error: &'a str,
            }
            serde_json::to_string(&ErrorJson { error: &error.to_string() }).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn output_format_parse_defaults_to_text() {
        assert_eq!(OutputFormat::parse("bogus"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("JSON"), OutputFormat::Json);
    }
}
