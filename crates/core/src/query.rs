use crate::chunk_store::ChunkStoreReader;
use crate::error::SearchError;
use crate::index_reader::IndexReader;
use crate::manifest::{load_statistics, IndexManifest};
use crate::models::{CorpusStatistics, IndexLayout, RankedChunk, RankingConfig, ScoredChunk};
use crate::scoring::{adjust_score, bm25};
use crate::tokenizer::StandardTokenizer;
use crate::traits::{ChunkSource, PostingsSource, Tokenizer};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};

/// Query engine backed by the on-disk index files.
pub type DiskQueryEngine<T = StandardTokenizer> = QueryEngine<IndexReader, ChunkStoreReader, T>;

/// Scores chunks for free-text queries against one index build.
///
/// Corpus statistics are loaded on the first query and reused afterwards.
pub struct QueryEngine<P, C, T> {
    postings: P,
    chunks: C,
    tokenizer: T,
    ranking: RankingConfig,
    stats_path: PathBuf,
    stats: Option<CorpusStatistics>,
}

impl<P, C, T> QueryEngine<P, C, T>
where
    P: PostingsSource,
    C: ChunkSource,
    T: Tokenizer,
{
    pub fn new(
        postings: P,
        chunks: C,
        tokenizer: T,
        ranking: RankingConfig,
        stats_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            postings,
            chunks,
            tokenizer,
            ranking,
            stats_path: stats_path.into(),
            stats: None,
        }
    }

    /// Seeds the statistics instead of reading them from disk.
    pub fn with_statistics(mut self, stats: CorpusStatistics) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn ranking(&self) -> &RankingConfig {
        &self.ranking
    }

    pub fn statistics(&mut self) -> Result<CorpusStatistics, SearchError> {
        if let Some(stats) = self.stats {
            return Ok(stats);
        }

        let stats = load_statistics(&self.stats_path)?;
        debug!(
            chunks = stats.total_chunks,
            average_chunk_tokens = stats.average_chunk_token_count,
            "loaded corpus statistics"
        );
        self.stats = Some(stats);
        Ok(stats)
    }

    /// Splits a query into distinct terms, keeping first-seen order.
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tokenizer
            .tokenize(query)
            .into_iter()
            .filter(|token| seen.insert(token.clone()))
            .collect()
    }

    /// Scores every candidate chunk and returns the adjusted scores in
    /// descending order, before per-document deduplication.
    pub fn score(&mut self, terms: &[String]) -> Result<Vec<ScoredChunk>, SearchError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stats = self.statistics()?;
        let token_postings = self.postings.read_postings(terms)?;

        let candidates: Vec<u32> = token_postings
            .iter()
            .flat_map(|entry| entry.postings.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let metadata = self.chunks.read_metadata_batch(&candidates)?;

        // chunk id -> (summed bm25, matched terms)
        let mut accumulated = BTreeMap::<u32, (f64, usize)>::new();
        for entry in &token_postings {
            let document_frequency = entry.document_frequency();
            for (&chunk_id, &term_frequency) in &entry.postings {
                let Some(meta) = metadata.get(&chunk_id) else {
                    continue;
                };
                let score = bm25(
                    term_frequency,
                    document_frequency,
                    meta.token_count,
                    &stats,
                    &self.ranking,
                );
                let slot = accumulated.entry(chunk_id).or_insert((0.0, 0));
                slot.0 += score;
                slot.1 += 1;
            }
        }

        let mut scored: Vec<ScoredChunk> = accumulated
            .into_iter()
            .filter_map(|(chunk_id, (base_score, matched_terms))| {
                let meta = metadata.get(&chunk_id)?;
                let score = adjust_score(base_score, matched_terms, terms.len(), meta.token_count)?;
                Some(ScoredChunk {
                    score,
                    chunk_id,
                    meta: *meta,
                })
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        Ok(scored)
    }

    /// Runs the full pipeline: tokenize, score, keep one chunk per source
    /// document up to `top_k`, and fetch the winners' text.
    pub fn search(&mut self, query: &str) -> Result<Vec<RankedChunk>, SearchError> {
        let terms = self.query_terms(query);
        if terms.is_empty() {
            debug!(query, "query has no index terms");
            return Ok(Vec::new());
        }

        let scored = self.score(&terms)?;
        let candidate_count = scored.len();
        let winners = select_top_k(scored, self.ranking.top_k);

        let mut ranked = Vec::with_capacity(winners.len());
        for winner in winners {
            let text = self.chunks.read_text(&winner.meta)?;
            ranked.push(RankedChunk {
                chunk_id: winner.chunk_id,
                source_doc_id: winner.meta.source_doc_id,
                score: winner.score,
                text,
            });
        }

        info!(
            terms = terms.len(),
            candidates = candidate_count,
            returned = ranked.len(),
            "query ranked"
        );
        Ok(ranked)
    }
}

impl<T: Tokenizer> DiskQueryEngine<T> {
    /// Opens every file named by the layout's manifest.
    ///
    /// `tokenizer` must normalize text the same way as the one the index was
    /// built with.
    pub fn open(
        layout: &IndexLayout,
        ranking: RankingConfig,
        tokenizer: T,
    ) -> Result<Self, SearchError> {
        ranking.validate()?;
        let manifest = IndexManifest::load(layout)?;
        if manifest.record_size != ranking.record_size {
            return Err(SearchError::InvalidConfig(format!(
                "index was built with {}-byte records, ranking config expects {}",
                manifest.record_size, ranking.record_size
            )));
        }

        let postings = IndexReader::open(
            &layout.resolve(&manifest.index_file),
            &layout.resolve(&manifest.directory_file),
        )?;
        let chunks = ChunkStoreReader::open(
            &layout.resolve(&manifest.chunk_data_file),
            &layout.resolve(&manifest.chunk_index_file),
            manifest.record_size,
        )?;

        Ok(Self::new(
            postings,
            chunks,
            tokenizer,
            ranking,
            layout.resolve(&manifest.stats_file),
        ))
    }

    pub fn close(self) {
        self.postings.close();
    }
}

/// Keeps the best chunk of each source document, in score order, up to `top_k`.
///
/// `scored` must already be sorted best first; ties keep their incoming order.
pub fn select_top_k(scored: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    let mut seen_documents = HashSet::new();
    scored
        .into_iter()
        .filter(|chunk| seen_documents.insert(chunk.meta.source_doc_id))
        .take(top_k)
        .collect()
}
