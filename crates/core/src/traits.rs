use crate::{ChunkMetaData, SearchError, TokenPostings};
use std::collections::HashMap;

/// Turns raw text into normalized index terms.
///
/// Ingestion and querying must share one implementation so that query terms
/// line up with indexed tokens.
pub trait Tokenizer {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

pub trait PostingsSource {
    /// Returns one entry per requested token, in request order. Tokens without
    /// postings come back with an empty map.
    fn read_postings(&mut self, tokens: &[String]) -> Result<Vec<TokenPostings>, SearchError>;
}

pub trait ChunkSource {
    /// Fetches metadata for every id that exists. Missing ids are left out.
    fn read_metadata_batch(
        &mut self,
        chunk_ids: &[u32],
    ) -> Result<HashMap<u32, ChunkMetaData>, SearchError>;

    fn read_text(&mut self, meta: &ChunkMetaData) -> Result<String, SearchError>;
}
