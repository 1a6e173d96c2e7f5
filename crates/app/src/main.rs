mod squad;

use anyhow::Context;
use chrono::Utc;
use chunk_search_core::{
    ingest_documents, ChunkingConfig, IndexBuildConfig, IndexLayout, IndexManifest,
    IngestionOptions, RankingConfig, SearchCoordinator, StandardTokenizer,
};
use clap::{Args, Parser, Subcommand};
use squad::SquadReader;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chunk-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root folder holding the chunk store, index and manifest.
    #[arg(long, global = true, env = "CHUNK_SEARCH_ROOT", default_value = "index-data")]
    root: PathBuf,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args)]
struct TuningArgs {
    /// Words per chunk.
    #[arg(long, global = true, env = "CHUNK_SEARCH_CHUNK_SIZE", default_value_t = 512)]
    chunk_size: usize,

    /// Words shared by consecutive chunks.
    #[arg(long, global = true, env = "CHUNK_SEARCH_CHUNK_OVERLAP", default_value_t = 55)]
    chunk_overlap: usize,

    /// Chunks shorter than this many characters are dropped.
    #[arg(long, global = true, default_value_t = 20)]
    min_chunk_length: usize,

    /// Minimum share of alphabetic characters a chunk needs.
    #[arg(long, global = true, default_value_t = 0.5)]
    alphabet_ratio: f64,

    /// Documents per partial index before it is spilled to disk.
    #[arg(long, global = true, default_value_t = 1_000)]
    documents_per_partial: usize,

    /// Chunk index record width in bytes.
    #[arg(long, global = true, env = "CHUNK_SEARCH_RECORD_SIZE", default_value_t = 24)]
    record_size: usize,

    /// BM25 term-frequency saturation.
    #[arg(long, global = true, default_value_t = 1.2)]
    k1: f64,

    /// BM25 length normalization.
    #[arg(long, global = true, default_value_t = 0.75)]
    b: f64,

    /// Number of results to return.
    #[arg(long, global = true, env = "CHUNK_SEARCH_TOP_K", default_value_t = 5)]
    top_k: usize,
}

impl TuningArgs {
    fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
                min_chunk_length: self.min_chunk_length,
                alphabet_ratio: self.alphabet_ratio,
            },
            index: IndexBuildConfig {
                documents_per_partial: self.documents_per_partial,
                ..IndexBuildConfig::default()
            },
            record_size: self.record_size,
        }
    }

    fn ranking(&self) -> RankingConfig {
        RankingConfig {
            k1: self.k1,
            b: self.b,
            top_k: self.top_k,
            record_size: self.record_size,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Parse SQuAD json and build the chunk store and inverted index.
    Ingest {
        /// SQuAD json file, or a folder searched recursively for json files.
        #[arg(long)]
        data: PathBuf,
        /// Stop after this many paragraphs (0 means no limit).
        #[arg(long)]
        max_docs: Option<usize>,
    },
    /// Run one query and print the ranked chunks.
    Search {
        #[arg(long)]
        query: String,
    },
    /// Interactive query loop. `:reload` reopens the index, `:exit` quits.
    Repl,
    /// Check the compressed index against the manifest checksum.
    Verify,
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let layout = IndexLayout::new(&cli.root);
    info!(
        version = app_version,
        root = %cli.root.display(),
        started_at = %Utc::now().to_rfc3339(),
        "chunk-search boot"
    );

    match cli.command {
        Command::Ingest { data, max_docs } => {
            let documents = SquadReader::new(max_docs).read_all(&data)?;
            if documents.is_empty() {
                warn!(data = %data.display(), "no documents to ingest");
            }

            let report = ingest_documents(
                documents,
                &layout,
                &cli.tuning.ingestion_options(),
                StandardTokenizer::new()?,
            )?;

            for skipped in &report.skipped_documents {
                warn!(doc_id = %skipped.id, reason = %skipped.reason, "skipped document");
            }
            println!(
                "{} documents, {} chunks, {} tokens indexed at {}",
                report.documents,
                report.chunks,
                report.token_count,
                Utc::now().to_rfc3339()
            );
            if report.rejected_chunks > 0 || report.failed_chunks > 0 {
                println!(
                    "{} chunks rejected by quality filters, {} failed",
                    report.rejected_chunks, report.failed_chunks
                );
            }
        }
        Command::Search { query } => {
            let mut coordinator = SearchCoordinator::open(layout, cli.tuning.ranking())?;
            let hits = coordinator.search_ranked(&query)?;

            println!("query: {query}");
            if hits.is_empty() {
                println!("no results");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "[{}] score={:.4} chunk={} document_id={}",
                    rank + 1,
                    hit.score,
                    hit.chunk_id,
                    hit.source_doc_id
                );
                println!("  {}", hit.text);
            }
            coordinator.close();
        }
        Command::Repl => {
            let coordinator = SearchCoordinator::open(layout, cli.tuning.ranking())?;
            run_repl(coordinator, io::stdin().lock(), io::stdout().lock())?;
        }
        Command::Verify => {
            let manifest = IndexManifest::load(&layout)?;
            manifest
                .verify(&layout)
                .with_context(|| format!("verifying index under {}", layout.root().display()))?;
            println!(
                "ok: {} tokens, {} chunks, built {}",
                manifest.token_count,
                manifest.total_chunks,
                manifest.built_at.to_rfc3339()
            );
        }
    }

    Ok(())
}

/// Reads queries line by line until `:exit` or end of input. The coordinator
/// is closed when the loop ends, including on an output error.
fn run_repl<R: BufRead, W: Write>(
    mut coordinator: SearchCoordinator,
    input: R,
    mut output: W,
) -> anyhow::Result<()> {
    let result = (|| {
        write!(output, "> ")?;
        output.flush()?;

        for line in input.lines() {
            let line = line?;
            let query = line.trim();

            match query {
                "" => {}
                ":exit" => break,
                ":reload" => match coordinator.reload() {
                    Ok(()) => writeln!(output, "index reloaded")?,
                    Err(error) => writeln!(output, "reload failed: {error}")?,
                },
                _ => {
                    let texts = coordinator.search(query);
                    if texts.is_empty() {
                        writeln!(output, "no results")?;
                    }
                    for (rank, text) in texts.iter().enumerate() {
                        writeln!(output, "{}. {text}", rank + 1)?;
                    }
                }
            }

            write!(output, "> ")?;
            output.flush()?;
        }
        Ok::<_, io::Error>(())
    })();

    coordinator.close();
    result.context("repl i/o")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunk_search_core::ParsedDocument;
    use tempfile::tempdir;

    fn build_index(root: &std::path::Path) -> Result<IndexLayout, Box<dyn std::error::Error>> {
        let layout = IndexLayout::new(root);
        let mut options = IngestionOptions::default();
        options.chunking.chunk_size = 10;
        options.chunking.chunk_overlap = 2;

        let documents = vec![
            ParsedDocument {
                id: "0".to_string(),
                title: "super_bowl_50".to_string(),
                text: "the denver broncos defeated the carolina panthers to win super bowl 50"
                    .to_string(),
            },
            ParsedDocument {
                id: "1".to_string(),
                title: "normans".to_string(),
                text: "the normans were the people who gave their name to normandy in france"
                    .to_string(),
            },
        ];
        ingest_documents(documents, &layout, &options, StandardTokenizer::new()?)?;
        Ok(layout)
    }

    #[test]
    fn repl_answers_queries_and_handles_commands() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = build_index(dir.path())?;
        let coordinator = SearchCoordinator::open(layout, RankingConfig::default())?;

        let input = "normans people\n\n:reload\nxylophone\n:exit\nbroncos\n";
        let mut output = Vec::new();
        run_repl(coordinator, input.as_bytes(), &mut output)?;

        let printed = String::from_utf8(output)?;
        assert!(printed.contains("1. the normans were"));
        assert!(printed.contains("index reloaded"));
        assert!(printed.contains("no results"));
        assert!(!printed.contains("broncos defeated"));
        Ok(())
    }

    #[test]
    fn tuning_flags_map_onto_configs() {
        let cli = Cli::parse_from([
            "chunk-search",
            "--root",
            "/tmp/idx",
            "--chunk-size",
            "64",
            "--top-k",
            "3",
            "search",
            "--query",
            "normans",
        ]);

        let options = cli.tuning.ingestion_options();
        assert_eq!(options.chunking.chunk_size, 64);
        assert_eq!(options.chunking.chunk_overlap, 55);
        assert_eq!(cli.tuning.ranking().top_k, 3);
        assert_eq!(cli.root, PathBuf::from("/tmp/idx"));
        assert!(matches!(cli.command, Command::Search { .. }));
    }
}
