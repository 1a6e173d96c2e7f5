//! Record formats of the compressed inverted index.
//!
//! One token's postings are stored as a single newline-terminated JSON object
//! `{"<token>": [delta1, freq1, delta2, freq2, ...]}` where the first delta is
//! the first chunk id and every later delta is the gap to the previous id.
//! The token directory is a gzip stream of `{"token": ..., "offset": ...}`
//! lines pointing at those records.

use crate::models::Posting;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("interleaved list has odd length {0}")]
    OddLength(usize),

    #[error("chunk id overflows u32 at pair {position}")]
    ChunkIdOverflow { position: usize },
}

/// One line of the token directory. A negative offset marks a token without postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub token: String,
    pub offset: i64,
}

/// Interleaves delta-encoded chunk ids with their frequencies.
///
/// Callers must pass postings in strictly ascending chunk id order.
pub fn delta_encode(postings: &[Posting]) -> Vec<u32> {
    let mut encoded = Vec::with_capacity(postings.len() * 2);
    let mut previous = 0u32;

    for (index, posting) in postings.iter().enumerate() {
        let delta = if index == 0 {
            posting.chunk_id
        } else {
            posting.chunk_id - previous
        };
        encoded.push(delta);
        encoded.push(posting.term_frequency);
        previous = posting.chunk_id;
    }

    encoded
}

pub fn delta_decode(encoded: &[u32]) -> Result<BTreeMap<u32, u32>, DecodeError> {
    if encoded.len() % 2 != 0 {
        return Err(DecodeError::OddLength(encoded.len()));
    }

    let mut decoded = BTreeMap::new();
    let mut current_chunk_id = 0u32;

    for (position, pair) in encoded.chunks_exact(2).enumerate() {
        current_chunk_id = current_chunk_id
            .checked_add(pair[0])
            .ok_or(DecodeError::ChunkIdOverflow { position })?;
        decoded.insert(current_chunk_id, pair[1]);
    }

    Ok(decoded)
}

/// Serializes one postings record including its trailing newline.
pub fn encode_line(token: &str, postings: &[Posting]) -> Result<Vec<u8>, serde_json::Error> {
    let mut record = BTreeMap::new();
    record.insert(token, delta_encode(postings));
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    Ok(line)
}

/// Parses a postings record and returns its interleaved list.
///
/// A blank line yields `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Vec<u32>>, serde_json::Error> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let record: BTreeMap<String, Vec<u32>> = serde_json::from_str(line)?;
    Ok(record.into_values().next())
}

/// Reads one record terminated by `\n`, dropping a preceding `\r`.
///
/// Returns `Ok(None)` at end of file.
pub fn read_record<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(512);
    if reader.read_until(b'\n', &mut buffer)? == 0 {
        return Ok(None);
    }

    if buffer.last() == Some(&b'\n') {
        buffer.pop();
    }
    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }

    String::from_utf8(buffer)
        .map(Some)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}
