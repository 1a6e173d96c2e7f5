use crate::error::SearchError;
use crate::models::TokenPostings;
use crate::postings::{delta_decode, parse_line, read_record, DirectoryEntry};
use crate::traits::PostingsSource;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

/// Reads the gzip token directory fully into memory.
pub fn load_directory(path: &Path) -> Result<HashMap<String, i64>, SearchError> {
    let file = File::open(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => SearchError::NotFound(path.display().to_string()),
        _ => SearchError::Io(error),
    })?;
    let reader = BufReader::new(GzDecoder::new(file));

    let mut directory = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: DirectoryEntry = serde_json::from_str(&line)?;
        directory.insert(entry.token, entry.offset);
    }

    Ok(directory)
}

/// Token directory plus a seekable handle on the compressed index file.
pub struct IndexReader {
    directory: HashMap<String, i64>,
    index: BufReader<File>,
}

impl IndexReader {
    pub fn open(index_path: &Path, directory_path: &Path) -> Result<Self, SearchError> {
        let directory = load_directory(directory_path)?;
        let index = File::open(index_path).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => SearchError::NotFound(index_path.display().to_string()),
            _ => SearchError::Io(error),
        })?;

        info!(
            tokens = directory.len(),
            index = %index_path.display(),
            "loaded token directory"
        );

        Ok(Self {
            directory,
            index: BufReader::new(index),
        })
    }

    pub fn token_count(&self) -> usize {
        self.directory.len()
    }

    pub fn offset_of(&self, token: &str) -> Option<i64> {
        self.directory.get(token).copied().filter(|offset| *offset >= 0)
    }

    fn read_token(&mut self, token: &str) -> Result<TokenPostings, SearchError> {
        let Some(offset) = self.offset_of(token) else {
            debug!(token, "token has no postings");
            return Ok(TokenPostings::empty(token));
        };

        self.index.seek(SeekFrom::Start(offset as u64))?;
        let line = match read_record(&mut self.index) {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!(token, offset, "token offset points past the end of the index");
                return Ok(TokenPostings::empty(token));
            }
            Err(error) if error.kind() == std::io::ErrorKind::InvalidData => {
                warn!(token, offset, %error, "postings line is not valid UTF-8");
                return Ok(TokenPostings::empty(token));
            }
            Err(error) => return Err(error.into()),
        };

        let encoded = match parse_line(&line) {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return Ok(TokenPostings::empty(token)),
            Err(error) => {
                let preview: String = line.chars().take(50).collect();
                warn!(token, %error, line = %preview, "failed to parse postings line");
                return Ok(TokenPostings::empty(token));
            }
        };

        match delta_decode(&encoded) {
            Ok(postings) => Ok(TokenPostings {
                token: token.to_string(),
                postings,
            }),
            Err(error) => {
                warn!(token, %error, "failed to decode postings line");
                Ok(TokenPostings::empty(token))
            }
        }
    }

    /// Releases the index file handle and the in-memory directory.
    pub fn close(self) {
        debug!(tokens = self.directory.len(), "closing index reader");
    }
}

impl PostingsSource for IndexReader {
    fn read_postings(&mut self, tokens: &[String]) -> Result<Vec<TokenPostings>, SearchError> {
        tokens.iter().map(|token| self.read_token(token)).collect()
    }
}
