use crate::chunking::ChunkingConfig;
use crate::error::{IngestError, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Minimum width of one chunk index record in bytes.
pub const MIN_RECORD_SIZE: usize = 24;

/// A document as produced by an input parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub id: String,
    pub title: String,
    pub text: String,
}

/// Fixed-width record locating one chunk inside the chunk data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetaData {
    pub chunk_id: u32,
    pub data_offset: u64,
    pub data_length: u32,
    pub source_doc_id: u32,
    pub token_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub chunk_id: u32,
    pub term_frequency: u32,
}

impl Posting {
    pub fn new(chunk_id: u32, term_frequency: u32) -> Self {
        Self {
            chunk_id,
            term_frequency,
        }
    }
}

/// Decoded postings of one token, keyed by ascending chunk id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPostings {
    pub token: String,
    pub postings: BTreeMap<u32, u32>,
}

impl TokenPostings {
    pub fn empty(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            postings: BTreeMap::new(),
        }
    }

    pub fn document_frequency(&self) -> usize {
        self.postings.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStatistics {
    pub total_chunks: u64,
    pub total_tokens: u64,
    #[serde(rename = "averageChunkSize")]
    pub average_chunk_token_count: u64,
}

impl CorpusStatistics {
    pub fn from_totals(total_chunks: u64, total_tokens: u64) -> Self {
        let average_chunk_token_count = if total_chunks == 0 {
            0
        } else {
            total_tokens / total_chunks
        };

        Self {
            total_chunks,
            total_tokens,
            average_chunk_token_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub score: f64,
    pub chunk_id: u32,
    pub meta: ChunkMetaData,
}

/// One ranked query hit with its chunk text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk_id: u32,
    pub source_doc_id: u32,
    pub score: f64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingConfig {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalization.
    pub b: f64,
    pub top_k: usize,
    pub record_size: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            top_k: 5,
            record_size: MIN_RECORD_SIZE,
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(SearchError::InvalidConfig(format!(
                "k1 must be a non-negative number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(SearchError::InvalidConfig(format!(
                "b must lie in [0, 1], got {}",
                self.b
            )));
        }
        if self.top_k == 0 {
            return Err(SearchError::InvalidConfig("top_k must be at least 1".to_string()));
        }
        if self.record_size < MIN_RECORD_SIZE {
            return Err(SearchError::InvalidConfig(format!(
                "record size {} is below the minimum of {MIN_RECORD_SIZE}",
                self.record_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexBuildConfig {
    /// Seal the in-memory partial index after this many documents (0 disables).
    pub documents_per_partial: usize,
    /// Seal the in-memory partial index once it holds this many postings.
    pub max_postings_in_memory: usize,
    /// Tokens that never make it into the token directory.
    pub excluded_tokens: BTreeSet<String>,
}

impl Default for IndexBuildConfig {
    fn default() -> Self {
        Self {
            documents_per_partial: 1_000,
            max_postings_in_memory: 2_000_000,
            excluded_tokens: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOptions {
    pub chunking: ChunkingConfig,
    pub index: IndexBuildConfig,
    pub record_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            index: IndexBuildConfig::default(),
            record_size: MIN_RECORD_SIZE,
        }
    }
}

impl IngestionOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;
        if self.record_size < MIN_RECORD_SIZE {
            return Err(IngestError::InvalidArgument(format!(
                "record size {} is below the minimum of {MIN_RECORD_SIZE}",
                self.record_size
            )));
        }
        if self.index.max_postings_in_memory == 0 {
            return Err(IngestError::InvalidArgument(
                "max_postings_in_memory must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Directory layout of one index build, rooted at a single folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub const CHUNK_DATA_FILE: &'static str = "chunks/chunk_data.data";
    pub const CHUNK_INDEX_FILE: &'static str = "chunks/chunk_index.bin";
    pub const INDEX_DIR: &'static str = "index";
    pub const COMPRESSED_INDEX_FILE: &'static str = "index/inverted_index_delta_encoded.json";
    pub const DIRECTORY_FILE: &'static str = "index/token_index_offset.json.gz";
    pub const STATS_FILE: &'static str = "stats/stats.json";
    pub const MANIFEST_FILE: &'static str = "manifest.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn chunk_data_path(&self) -> PathBuf {
        self.resolve(Self::CHUNK_DATA_FILE)
    }

    pub fn chunk_index_path(&self) -> PathBuf {
        self.resolve(Self::CHUNK_INDEX_FILE)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.resolve(Self::INDEX_DIR)
    }

    pub fn compressed_index_path(&self) -> PathBuf {
        self.resolve(Self::COMPRESSED_INDEX_FILE)
    }

    pub fn directory_path(&self) -> PathBuf {
        self.resolve(Self::DIRECTORY_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.resolve(Self::STATS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.resolve(Self::MANIFEST_FILE)
    }

    /// Creates every directory the build writes into.
    pub fn create_dirs(&self) -> Result<(), IngestError> {
        for relative in [Self::CHUNK_DATA_FILE, Self::STATS_FILE, Self::COMPRESSED_INDEX_FILE] {
            if let Some(parent) = self.resolve(relative).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_chunk_size_guards_empty_corpus() {
        let stats = CorpusStatistics::from_totals(0, 0);
        assert_eq!(stats.average_chunk_token_count, 0);

        let stats = CorpusStatistics::from_totals(4, 410);
        assert_eq!(stats.average_chunk_token_count, 102);
    }

    #[test]
    fn statistics_use_persisted_key_names() -> Result<(), Box<dyn std::error::Error>> {
        let stats = CorpusStatistics::from_totals(3, 600);
        let json = serde_json::to_value(stats)?;
        assert_eq!(json["totalChunks"], 3);
        assert_eq!(json["totalTokens"], 600);
        assert_eq!(json["averageChunkSize"], 200);
        Ok(())
    }

    #[test]
    fn ranking_config_rejects_small_records() {
        let config = RankingConfig {
            record_size: 16,
            ..RankingConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RankingConfig::default().validate().is_ok());
    }

    #[test]
    fn layout_paths_share_the_root() {
        let layout = IndexLayout::new("/data/run");
        assert_eq!(
            layout.chunk_index_path(),
            PathBuf::from("/data/run/chunks/chunk_index.bin")
        );
        assert_eq!(
            layout.directory_path(),
            PathBuf::from("/data/run/index/token_index_offset.json.gz")
        );
        assert!(layout.compressed_index_path().starts_with(layout.index_dir()));
    }
}
