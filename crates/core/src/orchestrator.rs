use crate::models::{IndexLayout, RankedChunk, RankingConfig};
use crate::query::DiskQueryEngine;
use crate::tokenizer::StandardTokenizer;
use crate::traits::Tokenizer;
use crate::SearchError;
use tracing::{error, info};

/// Owns the open index and turns query failures into empty answers.
///
/// Construction errors are returned to the caller. Once open, a failed query
/// is logged and yields no results, and the coordinator stays usable.
pub struct SearchCoordinator<T = StandardTokenizer> {
    layout: IndexLayout,
    ranking: RankingConfig,
    tokenizer: T,
    engine: Option<DiskQueryEngine<T>>,
}

impl SearchCoordinator<StandardTokenizer> {
    /// Opens an index built with [`StandardTokenizer`].
    pub fn open(layout: IndexLayout, ranking: RankingConfig) -> Result<Self, SearchError> {
        Self::open_with_tokenizer(layout, ranking, StandardTokenizer::new()?)
    }
}

impl<T: Tokenizer + Clone> SearchCoordinator<T> {
    /// Opens an index built with `tokenizer`, which is reused on every reload.
    pub fn open_with_tokenizer(
        layout: IndexLayout,
        ranking: RankingConfig,
        tokenizer: T,
    ) -> Result<Self, SearchError> {
        let engine = DiskQueryEngine::open(&layout, ranking, tokenizer.clone())?;
        info!(root = %layout.root().display(), top_k = ranking.top_k, "search index opened");

        Ok(Self {
            layout,
            ranking,
            tokenizer,
            engine: Some(engine),
        })
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// Ranked hits with scores and ids, best first.
    pub fn search_ranked(&mut self, query: &str) -> Result<Vec<RankedChunk>, SearchError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| SearchError::NotFound("no open index".to_string()))?;
        engine.search(query)
    }

    /// Chunk texts for `query`, best first. Failures are logged and produce an
    /// empty list.
    pub fn search(&mut self, query: &str) -> Vec<String> {
        match self.search_ranked(query) {
            Ok(hits) => hits.into_iter().map(|hit| hit.text).collect(),
            Err(err) => {
                if err.is_corruption() {
                    error!(query, error = %err, "index corruption while answering query");
                } else {
                    error!(query, error = %err, "query failed");
                }
                Vec::new()
            }
        }
    }

    /// Drops every open handle and reopens the index from its manifest.
    ///
    /// Memoized statistics go with the old engine. If reopening fails the
    /// coordinator has no index until the next successful reload.
    pub fn reload(&mut self) -> Result<(), SearchError> {
        if let Some(engine) = self.engine.take() {
            engine.close();
        }

        let engine = DiskQueryEngine::open(&self.layout, self.ranking, self.tokenizer.clone())?;
        self.engine = Some(engine);
        info!(root = %self.layout.root().display(), "search index reloaded");
        Ok(())
    }

    pub fn close(mut self) {
        if let Some(engine) = self.engine.take() {
            engine.close();
        }
        info!(root = %self.layout.root().display(), "search index closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_documents;
    use crate::models::{IngestionOptions, ParsedDocument};
    use crate::tokenizer::StandardTokenizer;
    use crate::traits::Tokenizer;
    use tempfile::tempdir;

    fn document(id: u32, title: &str, text: &str) -> ParsedDocument {
        ParsedDocument {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    fn small_options() -> IngestionOptions {
        let mut options = IngestionOptions::default();
        options.chunking.chunk_size = 12;
        options.chunking.chunk_overlap = 2;
        options.chunking.min_chunk_length = 3;
        options
    }

    fn corpus() -> Vec<ParsedDocument> {
        vec![
            document(
                0,
                "glaciers",
                "glaciers move slowly across the valley floor carving deep grooves into bedrock",
            ),
            document(
                1,
                "volcanoes",
                "volcanic eruptions release lava ash and gases from deep inside the earth",
            ),
            document(
                2,
                "rivers",
                "rivers carry sediment downstream and build wide deltas where they meet the sea",
            ),
        ]
    }

    #[test]
    fn ingested_corpus_answers_queries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = IndexLayout::new(dir.path());
        ingest_documents(corpus(), &layout, &small_options(), StandardTokenizer::new()?)?;

        let mut coordinator = SearchCoordinator::open(layout, RankingConfig::default())?;
        let hits = coordinator.search_ranked("volcanic lava")?;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source_doc_id, 1);
        assert!(hits[0].text.contains("lava"));

        let texts = coordinator.search("sediment deltas");
        assert!(texts[0].contains("sediment"));
        assert!(coordinator.search("").is_empty());
        assert!(coordinator.search("unicorn").is_empty());
        coordinator.close();
        Ok(())
    }

    #[test]
    fn missing_index_fails_to_open() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = SearchCoordinator::open(IndexLayout::new(dir.path()), RankingConfig::default());
        assert!(matches!(result, Err(SearchError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn query_errors_become_empty_results() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = IndexLayout::new(dir.path());
        ingest_documents(corpus(), &layout, &small_options(), StandardTokenizer::new()?)?;

        let mut coordinator = SearchCoordinator::open(layout.clone(), RankingConfig::default())?;
        std::fs::remove_file(layout.stats_path())?;
        assert!(coordinator.search("glaciers").is_empty());
        assert!(matches!(
            coordinator.search_ranked("glaciers"),
            Err(SearchError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn reload_picks_up_a_rebuilt_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = IndexLayout::new(dir.path());
        ingest_documents(corpus(), &layout, &small_options(), StandardTokenizer::new()?)?;

        let mut coordinator = SearchCoordinator::open(layout.clone(), RankingConfig::default())?;
        assert!(coordinator.search("penguins").is_empty());

        let rebuilt = vec![document(
            0,
            "penguins",
            "penguins huddle together on antarctic ice to survive the winter storms",
        )];
        ingest_documents(rebuilt, &layout, &small_options(), StandardTokenizer::new()?)?;

        coordinator.reload()?;
        let texts = coordinator.search("penguins");
        assert!(!texts.is_empty());
        assert!(coordinator.search("volcanic").is_empty());
        coordinator.close();
        Ok(())
    }

    #[derive(Clone)]
    struct PluralFoldingTokenizer(StandardTokenizer);

    impl Tokenizer for PluralFoldingTokenizer {
        fn tokenize(&self, text: &str) -> Vec<String> {
            self.0
                .tokenize(text)
                .into_iter()
                .map(|token| match token.strip_suffix('s') {
                    Some(stem) if stem.len() > 2 => stem.to_string(),
                    _ => token,
                })
                .collect()
        }
    }

    #[test]
    fn queries_reuse_the_ingestion_tokenizer() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = IndexLayout::new(dir.path());
        let tokenizer = PluralFoldingTokenizer(StandardTokenizer::new()?);
        ingest_documents(corpus(), &layout, &small_options(), tokenizer.clone())?;

        let mut standard = SearchCoordinator::open(layout.clone(), RankingConfig::default())?;
        assert!(standard.search("glaciers").is_empty());
        standard.close();

        let mut folding =
            SearchCoordinator::open_with_tokenizer(layout, RankingConfig::default(), tokenizer)?;
        let hits = folding.search_ranked("glaciers")?;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source_doc_id, 0);

        folding.reload()?;
        assert!(!folding.search("glacier").is_empty());
        folding.close();
        Ok(())
    }

    #[test]
    fn mismatched_record_size_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = IndexLayout::new(dir.path());
        ingest_documents(corpus(), &layout, &small_options(), StandardTokenizer::new()?)?;

        let ranking = RankingConfig {
            record_size: 32,
            ..RankingConfig::default()
        };
        assert!(matches!(
            SearchCoordinator::open(layout, ranking),
            Err(SearchError::InvalidConfig(_))
        ));
        Ok(())
    }
}
