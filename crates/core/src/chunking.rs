use crate::chunk_store::ChunkStoreWriter;
use crate::error::IngestError;
use crate::index_builder::IndexBuilder;
use crate::manifest::write_statistics;
use crate::models::CorpusStatistics;
use crate::traits::Tokenizer;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkingConfig {
    /// Window width in whitespace-delimited words.
    pub chunk_size: usize,
    /// Words shared by consecutive windows.
    pub chunk_overlap: usize,
    /// Minimum chunk length in characters.
    pub min_chunk_length: usize,
    /// Minimum share of alphabetic characters in a chunk.
    pub alphabet_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 55,
            min_chunk_length: 20,
            alphabet_ratio: 0.5,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.alphabet_ratio) {
            return Err(IngestError::InvalidChunkConfig(format!(
                "alphabet_ratio must lie in [0, 1], got {}",
                self.alphabet_ratio
            )));
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Splits whitespace-delimited words into windows of `chunk_size` words that
/// advance by `chunk_size - chunk_overlap`. The last window is clipped and no
/// window starts after the one that reaches the end of the text.
pub fn sliding_windows(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let step = config.step().max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + config.chunk_size).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    windows
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityRejection {
    TooShort { length: usize },
    LowAlphabetRatio { ratio: f64 },
}

pub fn check_quality(chunk: &str, config: &ChunkingConfig) -> Result<(), QualityRejection> {
    let length = chunk.chars().count();
    if length < config.min_chunk_length || length == 0 {
        return Err(QualityRejection::TooShort { length });
    }

    let alphabetic = chunk.chars().filter(|c| c.is_alphabetic()).count();
    let ratio = alphabetic as f64 / length as f64;
    if ratio < config.alphabet_ratio {
        return Err(QualityRejection::LowAlphabetRatio { ratio });
    }

    Ok(())
}

/// Per-document counts reported by [`ChunkingEngine::process_document`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub emitted: usize,
    pub rejected: usize,
    pub failed: usize,
}

pub struct ChunkingSummary {
    pub statistics: CorpusStatistics,
    pub rejected_chunks: u64,
    pub failed_chunks: u64,
    pub builder: IndexBuilder,
}

/// Turns documents into stored, tokenized chunks and feeds the index builder.
pub struct ChunkingEngine<T> {
    config: ChunkingConfig,
    tokenizer: T,
    store: ChunkStoreWriter,
    builder: IndexBuilder,
    stats_path: PathBuf,
    total_chunks: u64,
    total_tokens: u64,
    rejected_chunks: u64,
    failed_chunks: u64,
}

impl<T: Tokenizer> ChunkingEngine<T> {
    pub fn new(
        config: ChunkingConfig,
        tokenizer: T,
        store: ChunkStoreWriter,
        builder: IndexBuilder,
        stats_path: impl Into<PathBuf>,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self {
            config,
            tokenizer,
            store,
            builder,
            stats_path: stats_path.into(),
            total_chunks: 0,
            total_tokens: 0,
            rejected_chunks: 0,
            failed_chunks: 0,
        })
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Chunks one piece of text belonging to `source_doc_id`.
    ///
    /// Rejected and unattributable chunks are logged and skipped. A chunk
    /// store or index builder error aborts the rest of the text, and a failed
    /// store write leaves the store refusing every later chunk.
    pub fn process_document(
        &mut self,
        text: &str,
        source_doc_id: &str,
    ) -> Result<DocumentOutcome, IngestError> {
        let doc_id = source_doc_id
            .trim()
            .parse::<u32>()
            .map_err(|_| IngestError::InvalidDocumentId(source_doc_id.to_string()));
        let mut outcome = DocumentOutcome::default();

        for chunk in sliding_windows(text, &self.config) {
            let doc_id = match &doc_id {
                Ok(doc_id) => *doc_id,
                Err(error) => {
                    warn!(%error, "skipping chunk");
                    outcome.failed += 1;
                    continue;
                }
            };

            if let Err(reason) = check_quality(&chunk, &self.config) {
                debug!(doc_id, ?reason, "chunk rejected by quality filter");
                outcome.rejected += 1;
                continue;
            }

            let tokens = self.tokenizer.tokenize(&chunk);
            let token_count = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
            let chunk_id = self.store.next_chunk_id();

            self.store
                .append(chunk_id, chunk.as_bytes(), doc_id, token_count)?;
            self.total_chunks += 1;
            self.total_tokens += tokens.len() as u64;
            outcome.emitted += 1;

            self.builder.add_chunk(chunk_id, &tokens)?;
        }

        self.rejected_chunks += outcome.rejected as u64;
        self.failed_chunks += outcome.failed as u64;
        Ok(outcome)
    }

    /// Marks the end of one source document.
    pub fn end_document(&mut self) -> Result<(), IngestError> {
        self.builder.end_document()
    }

    /// Flushes the chunk store and persists the corpus statistics.
    pub fn finish(self) -> Result<ChunkingSummary, IngestError> {
        self.store.finish()?;

        let statistics = CorpusStatistics::from_totals(self.total_chunks, self.total_tokens);
        write_statistics(&self.stats_path, &statistics)?;

        info!(
            chunks = statistics.total_chunks,
            tokens = statistics.total_tokens,
            average_chunk_tokens = statistics.average_chunk_token_count,
            rejected = self.rejected_chunks,
            failed = self.failed_chunks,
            "chunking finished"
        );

        Ok(ChunkingSummary {
            statistics,
            rejected_chunks: self.rejected_chunks,
            failed_chunks: self.failed_chunks,
            builder: self.builder,
        })
    }
}
