pub mod chunk_store;
pub mod chunking;
pub mod error;
pub mod index_builder;
pub mod index_reader;
pub mod ingest;
pub mod manifest;
pub mod models;
pub mod orchestrator;
pub mod postings;
pub mod query;
pub mod scoring;
pub mod tokenizer;
pub mod traits;

pub use chunk_store::{ChunkStoreReader, ChunkStoreWriter};
pub use chunking::{
    check_quality, sliding_windows, ChunkingConfig, ChunkingEngine,
    ChunkingSummary, DocumentOutcome, QualityRejection,
};
pub use error::{IngestError, SearchError};
pub use index_builder::{
    merge_and_compact, merge_spills, CompactedIndex, IndexBuilder, PartialIndex,
};
pub use index_reader::{load_directory, IndexReader};
pub use ingest::{discover_input_files, ingest_documents, IngestionReport, SkippedDocument};
pub use manifest::{load_statistics, write_statistics, IndexManifest};
pub use models::{
    ChunkMetaData, CorpusStatistics, IndexBuildConfig, IndexLayout, IngestionOptions,
    ParsedDocument, Posting, RankedChunk, RankingConfig, ScoredChunk, TokenPostings,
    MIN_RECORD_SIZE,
};
pub use orchestrator::SearchCoordinator;
pub use query::{select_top_k, DiskQueryEngine, QueryEngine};
pub use tokenizer::StandardTokenizer;
pub use traits::{ChunkSource, PostingsSource, Tokenizer};
