use crate::error::IngestError;
use crate::models::{IndexBuildConfig, Posting};
use crate::postings::{encode_line, DirectoryEntry};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Token postings accumulated over a contiguous range of chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialIndex {
    postings: HashMap<String, Vec<Posting>>,
    posting_count: usize,
}

#[derive(Serialize, Deserialize)]
struct SpillRecord {
    token: String,
    postings: Vec<(u32, u32)>,
}

impl PartialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.postings.len()
    }

    pub fn posting_count(&self) -> usize {
        self.posting_count
    }

    pub fn postings(&self, token: &str) -> Option<&[Posting]> {
        self.postings.get(token).map(Vec::as_slice)
    }

    /// Appends a posting. Chunk ids must not decrease per token; a repeated id
    /// adds to the stored frequency.
    pub fn add_posting(
        &mut self,
        token: &str,
        chunk_id: u32,
        term_frequency: u32,
    ) -> Result<(), IngestError> {
        let list = self.postings.entry(token.to_string()).or_default();

        match list.last_mut() {
            Some(last) if last.chunk_id == chunk_id => {
                last.term_frequency = last.term_frequency.saturating_add(term_frequency);
            }
            Some(last) if last.chunk_id > chunk_id => {
                return Err(IngestError::OutOfOrderPosting {
                    token: token.to_string(),
                    chunk_id,
                    previous: last.chunk_id,
                });
            }
            _ => {
                list.push(Posting::new(chunk_id, term_frequency));
                self.posting_count += 1;
            }
        }

        Ok(())
    }

    /// Counts the tokens of one chunk and records a posting per distinct token.
    pub fn add_chunk(&mut self, chunk_id: u32, tokens: &[String]) -> Result<(), IngestError> {
        let mut frequencies = BTreeMap::<&str, u32>::new();
        for token in tokens {
            *frequencies.entry(token.as_str()).or_insert(0) += 1;
        }

        for (token, frequency) in frequencies {
            self.add_posting(token, chunk_id, frequency)?;
        }
        Ok(())
    }

    pub fn write_spill(&self, path: &Path) -> Result<(), IngestError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let tokens: BTreeSet<&String> = self.postings.keys().collect();

        for token in tokens {
            let record = SpillRecord {
                token: token.clone(),
                postings: self.postings[token]
                    .iter()
                    .map(|posting| (posting.chunk_id, posting.term_frequency))
                    .collect(),
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Summary of a merged and compacted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactedIndex {
    pub token_count: usize,
    pub posting_count: u64,
    pub index_bytes: u64,
}

/// Accumulates postings during chunking and spills sealed partial indexes to disk.
pub struct IndexBuilder {
    config: IndexBuildConfig,
    spill_dir: PathBuf,
    current: PartialIndex,
    spilled: Vec<PathBuf>,
    documents_in_partial: usize,
}

impl IndexBuilder {
    pub fn new(config: IndexBuildConfig, spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            spill_dir: spill_dir.into(),
            current: PartialIndex::new(),
            spilled: Vec::new(),
            documents_in_partial: 0,
        }
    }

    pub fn add_posting(
        &mut self,
        token: &str,
        chunk_id: u32,
        term_frequency: u32,
    ) -> Result<(), IngestError> {
        self.current.add_posting(token, chunk_id, term_frequency)
    }

    pub fn add_chunk(&mut self, chunk_id: u32, tokens: &[String]) -> Result<(), IngestError> {
        self.current.add_chunk(chunk_id, tokens)?;
        if self.current.posting_count() >= self.config.max_postings_in_memory {
            self.seal_partial()?;
        }
        Ok(())
    }

    /// Marks a document boundary, sealing the partial index on the configured cadence.
    pub fn end_document(&mut self) -> Result<(), IngestError> {
        self.documents_in_partial += 1;
        if self.config.documents_per_partial > 0
            && self.documents_in_partial >= self.config.documents_per_partial
        {
            self.seal_partial()?;
        }
        Ok(())
    }

    pub fn spilled_partials(&self) -> usize {
        self.spilled.len()
    }

    /// Writes the in-memory partial index to a spill file. No-op when empty.
    pub fn seal_partial(&mut self) -> Result<(), IngestError> {
        self.documents_in_partial = 0;
        if self.current.is_empty() {
            return Ok(());
        }

        let path = self
            .spill_dir
            .join(format!("partial_{:05}.jsonl", self.spilled.len()));
        self.current.write_spill(&path)?;
        debug!(
            path = %path.display(),
            tokens = self.current.token_count(),
            postings = self.current.posting_count(),
            "sealed partial index"
        );

        self.spilled.push(path);
        self.current = PartialIndex::new();
        Ok(())
    }

    /// Streams a merge of every spill file into the final compressed index
    /// and token directory, then removes the spill files.
    ///
    /// The in-memory partial is spilled first, so the merge holds at most one
    /// token record per spill file at a time.
    pub fn finish(
        mut self,
        index_path: &Path,
        directory_path: &Path,
    ) -> Result<CompactedIndex, IngestError> {
        self.seal_partial()?;

        let compacted = merge_spills(
            &self.spilled,
            &self.config.excluded_tokens,
            index_path,
            directory_path,
        )?;

        for path in &self.spilled {
            fs::remove_file(path)?;
        }
        Ok(compacted)
    }
}

/// Sequential writer for the compressed index and its token directory.
struct CompactWriter {
    index: BufWriter<File>,
    directory: GzEncoder<BufWriter<File>>,
    offset: u64,
    token_count: usize,
    posting_count: u64,
}

impl CompactWriter {
    fn create(index_path: &Path, directory_path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            index: BufWriter::new(File::create(index_path)?),
            directory: GzEncoder::new(
                BufWriter::new(File::create(directory_path)?),
                Compression::default(),
            ),
            offset: 0,
            token_count: 0,
            posting_count: 0,
        })
    }

    /// Tokens must arrive in ascending order.
    fn write_token(&mut self, token: &str, postings: &[Posting]) -> Result<(), IngestError> {
        let line = encode_line(token, postings)?;
        self.index.write_all(&line)?;

        let entry = DirectoryEntry {
            token: token.to_string(),
            offset: self.offset as i64,
        };
        serde_json::to_writer(&mut self.directory, &entry)?;
        self.directory.write_all(b"\n")?;

        self.offset += line.len() as u64;
        self.token_count += 1;
        self.posting_count += postings.len() as u64;
        Ok(())
    }

    fn finish(mut self, sources: usize) -> Result<CompactedIndex, IngestError> {
        self.index.flush()?;
        self.index.get_ref().sync_all()?;
        let mut directory = self.directory.finish()?;
        directory.flush()?;

        info!(
            tokens = self.token_count,
            postings = self.posting_count,
            index_bytes = self.offset,
            partials = sources,
            "compacted inverted index"
        );

        Ok(CompactedIndex {
            token_count: self.token_count,
            posting_count: self.posting_count,
            index_bytes: self.offset,
        })
    }
}

/// Unions postings of in-memory partial indexes token by token and writes the
/// delta-encoded index plus its gzip token directory.
///
/// Partials must be passed in chunk order; each token's lists are merged
/// without re-sorting.
pub fn merge_and_compact(
    partials: &[PartialIndex],
    excluded_tokens: &BTreeSet<String>,
    index_path: &Path,
    directory_path: &Path,
) -> Result<CompactedIndex, IngestError> {
    let tokens: BTreeSet<&String> = partials
        .iter()
        .flat_map(|partial| partial.postings.keys())
        .filter(|token| !excluded_tokens.contains(token.as_str()))
        .collect();

    let mut writer = CompactWriter::create(index_path, directory_path)?;
    for token in tokens {
        let mut merged: Vec<Posting> = Vec::new();
        for partial in partials {
            if let Some(list) = partial.postings(token) {
                merged = merge_sorted(merged, list);
            }
        }
        writer.write_token(token, &merged)?;
    }

    writer.finish(partials.len())
}

/// Reads the token records of one spill file in order.
struct SpillCursor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    last_token: Option<String>,
}

impl SpillCursor {
    fn open(path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(File::open(path)?).lines(),
            last_token: None,
        })
    }

    fn corrupt(&self, reason: String) -> IngestError {
        IngestError::CorruptSpill {
            path: self.path.display().to_string(),
            reason,
        }
    }

    /// Next record, checked for ascending tokens and chunk ids.
    fn next_record(&mut self) -> Result<Option<(String, Vec<Posting>)>, IngestError> {
        let record: SpillRecord = loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line?;
            if !line.trim().is_empty() {
                break serde_json::from_str(&line)?;
            }
        };

        if let Some(last) = &self.last_token {
            if record.token <= *last {
                return Err(self.corrupt(format!(
                    "token {:?} follows {last:?}",
                    record.token
                )));
            }
        }

        let postings: Vec<Posting> = record
            .postings
            .iter()
            .map(|&(chunk_id, term_frequency)| Posting::new(chunk_id, term_frequency))
            .collect();
        if postings
            .windows(2)
            .any(|pair| pair[1].chunk_id <= pair[0].chunk_id)
        {
            return Err(self.corrupt(format!(
                "postings of {:?} are not in ascending chunk order",
                record.token
            )));
        }

        self.last_token = Some(record.token.clone());
        Ok(Some((record.token, postings)))
    }
}

/// k-way merge of token-sorted spill files into the compressed index.
///
/// Spill files must be passed in chunk order. Only the current record of each
/// file is held in memory.
pub fn merge_spills(
    spill_paths: &[PathBuf],
    excluded_tokens: &BTreeSet<String>,
    index_path: &Path,
    directory_path: &Path,
) -> Result<CompactedIndex, IngestError> {
    let mut cursors = spill_paths
        .iter()
        .map(|path| SpillCursor::open(path))
        .collect::<Result<Vec<_>, _>>()?;

    // min-heap of (token, spill position); postings wait in `heads`
    let mut heap = BinaryHeap::new();
    let mut heads: Vec<Vec<Posting>> = vec![Vec::new(); cursors.len()];
    for (position, cursor) in cursors.iter_mut().enumerate() {
        if let Some((token, postings)) = cursor.next_record()? {
            heads[position] = postings;
            heap.push(Reverse((token, position)));
        }
    }

    let mut writer = CompactWriter::create(index_path, directory_path)?;
    while let Some(Reverse((token, first))) = heap.pop() {
        let mut positions = vec![first];
        while heap
            .peek()
            .is_some_and(|Reverse((next, _))| *next == token)
        {
            if let Some(Reverse((_, position))) = heap.pop() {
                positions.push(position);
            }
        }
        positions.sort_unstable();

        let mut merged: Vec<Posting> = Vec::new();
        for &position in &positions {
            let postings = std::mem::take(&mut heads[position]);
            merged = merge_sorted(merged, &postings);

            if let Some((next_token, next_postings)) = cursors[position].next_record()? {
                heads[position] = next_postings;
                heap.push(Reverse((next_token, position)));
            }
        }

        if !excluded_tokens.contains(&token) {
            writer.write_token(&token, &merged)?;
        }
    }

    writer.finish(spill_paths.len())
}

fn merge_sorted(left: Vec<Posting>, right: &[Posting]) -> Vec<Posting> {
    if left.is_empty() {
        return right.to_vec();
    }

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);

    while i < left.len() && j < right.len() {
        let (a, b) = (left[i], right[j]);
        if a.chunk_id < b.chunk_id {
            merged.push(a);
            i += 1;
        } else if b.chunk_id < a.chunk_id {
            merged.push(b);
            j += 1;
        } else {
            merged.push(Posting::new(
                a.chunk_id,
                a.term_frequency.saturating_add(b.term_frequency),
            ));
            i += 1;
            j += 1;
        }
    }

    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    merged
}
