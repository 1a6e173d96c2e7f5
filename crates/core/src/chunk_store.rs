//! Paired chunk files: a data file of concatenated UTF-8 payloads and an index
//! file of fixed-width big-endian records.
//!
//! Record layout (first 24 bytes, any remaining bytes are zero padding):
//! - u32 chunk id
//! - u64 data offset
//! - u32 data length
//! - u32 source document id
//! - u32 token count

use crate::error::{IngestError, SearchError};
use crate::models::{ChunkMetaData, MIN_RECORD_SIZE};
use crate::traits::ChunkSource;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

impl ChunkMetaData {
    pub fn encode(&self, record_size: usize) -> Vec<u8> {
        let mut record = Vec::with_capacity(record_size.max(MIN_RECORD_SIZE));
        record.extend_from_slice(&self.chunk_id.to_be_bytes());
        record.extend_from_slice(&self.data_offset.to_be_bytes());
        record.extend_from_slice(&self.data_length.to_be_bytes());
        record.extend_from_slice(&self.source_doc_id.to_be_bytes());
        record.extend_from_slice(&self.token_count.to_be_bytes());
        record.resize(record_size.max(MIN_RECORD_SIZE), 0);
        record
    }

    /// Decodes the leading 24 bytes of a record.
    pub fn decode(record: &[u8]) -> Option<Self> {
        if record.len() < MIN_RECORD_SIZE {
            return None;
        }

        let u32_at = |at: usize| {
            u32::from_be_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]])
        };
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&record[4..12]);

        Some(Self {
            chunk_id: u32_at(0),
            data_offset: u64::from_be_bytes(offset),
            data_length: u32_at(12),
            source_doc_id: u32_at(16),
            token_count: u32_at(20),
        })
    }
}

/// Sequential writer for a fresh pair of chunk files.
///
/// Any failed write leaves the files in an unknown state, so the writer
/// refuses every later append and the final flush.
pub struct ChunkStoreWriter {
    data: BufWriter<File>,
    index: BufWriter<File>,
    record_size: usize,
    next_offset: u64,
    next_chunk_id: u32,
    poisoned: bool,
}

impl ChunkStoreWriter {
    /// Creates both files, truncating output from a previous run.
    pub fn create(data_path: &Path, index_path: &Path, record_size: usize) -> Result<Self, IngestError> {
        if record_size < MIN_RECORD_SIZE {
            return Err(IngestError::InvalidArgument(format!(
                "record size {record_size} is below the minimum of {MIN_RECORD_SIZE}"
            )));
        }

        let open = |path: &Path| {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
        };

        Ok(Self {
            data: BufWriter::new(open(data_path)?),
            index: BufWriter::new(open(index_path)?),
            record_size,
            next_offset: 0,
            next_chunk_id: 0,
            poisoned: false,
        })
    }

    pub fn next_chunk_id(&self) -> u32 {
        self.next_chunk_id
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Appends one chunk and returns the byte offset of its payload.
    ///
    /// Chunk ids must arrive densely in increasing order so that record `i`
    /// sits at `i * record_size`.
    pub fn append(
        &mut self,
        chunk_id: u32,
        bytes: &[u8],
        source_doc_id: u32,
        token_count: u32,
    ) -> Result<u64, IngestError> {
        if self.poisoned {
            return Err(IngestError::StoreUnusable);
        }
        if chunk_id != self.next_chunk_id {
            return Err(IngestError::OutOfOrderChunk {
                chunk_id,
                expected: self.next_chunk_id,
            });
        }
        let data_length =
            u32::try_from(bytes.len()).map_err(|_| IngestError::PayloadTooLarge(bytes.len()))?;

        let meta = ChunkMetaData {
            chunk_id,
            data_offset: self.next_offset,
            data_length,
            source_doc_id,
            token_count,
        };

        let written = self
            .data
            .write_all(bytes)
            .and_then(|()| self.index.write_all(&meta.encode(self.record_size)));
        if let Err(error) = written {
            self.poisoned = true;
            warn!(chunk_id, %error, "chunk store write failed; refusing further appends");
            return Err(error.into());
        }

        self.next_offset += u64::from(data_length);
        self.next_chunk_id += 1;
        Ok(meta.data_offset)
    }

    /// Flushes and syncs both files, returning the number of chunks written.
    pub fn finish(mut self) -> Result<u32, IngestError> {
        if self.poisoned {
            return Err(IngestError::StoreUnusable);
        }
        self.data.flush()?;
        self.index.flush()?;
        self.data.get_ref().sync_all()?;
        self.index.get_ref().sync_all()?;
        Ok(self.next_chunk_id)
    }
}

/// Random-access reader over a finished pair of chunk files.
pub struct ChunkStoreReader {
    data: File,
    index: File,
    record_size: usize,
    record_count: u64,
}

impl ChunkStoreReader {
    pub fn open(data_path: &Path, index_path: &Path, record_size: usize) -> Result<Self, SearchError> {
        if record_size < MIN_RECORD_SIZE {
            return Err(SearchError::InvalidConfig(format!(
                "record size {record_size} is below the minimum of {MIN_RECORD_SIZE}"
            )));
        }

        let data = open_existing(data_path)?;
        let index = open_existing(index_path)?;

        let index_len = index.metadata()?.len();
        let record_size_u64 = record_size as u64;
        if index_len % record_size_u64 != 0 {
            warn!(
                path = %index_path.display(),
                trailing_bytes = index_len % record_size_u64,
                "chunk index ends with a partial record; ignoring it"
            );
        }

        Ok(Self {
            data,
            index,
            record_size,
            record_count: index_len / record_size_u64,
        })
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn read_metadata(&mut self, chunk_id: u32) -> Result<ChunkMetaData, SearchError> {
        if u64::from(chunk_id) >= self.record_count {
            return Err(SearchError::ChunkNotFound(chunk_id));
        }

        let mut record = vec![0u8; self.record_size];
        self.index
            .seek(SeekFrom::Start(u64::from(chunk_id) * self.record_size as u64))?;
        self.index.read_exact(&mut record)?;

        let meta = ChunkMetaData::decode(&record)
            .ok_or_else(|| SearchError::Corruption(format!("short record for chunk {chunk_id}")))?;
        if meta.chunk_id != chunk_id {
            return Err(SearchError::ChunkIdMismatch {
                expected: chunk_id,
                found: meta.chunk_id,
            });
        }

        Ok(meta)
    }

    pub fn read_text(&mut self, meta: &ChunkMetaData) -> Result<String, SearchError> {
        let mut buffer = vec![0u8; meta.data_length as usize];
        self.data.seek(SeekFrom::Start(meta.data_offset))?;
        self.data.read_exact(&mut buffer)?;

        String::from_utf8(buffer).map_err(|error| {
            SearchError::Corruption(format!(
                "chunk {} payload is not valid UTF-8: {error}",
                meta.chunk_id
            ))
        })
    }
}

impl ChunkSource for ChunkStoreReader {
    fn read_metadata_batch(
        &mut self,
        chunk_ids: &[u32],
    ) -> Result<HashMap<u32, ChunkMetaData>, SearchError> {
        let mut ordered = chunk_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut found = HashMap::with_capacity(ordered.len());
        for chunk_id in ordered {
            match self.read_metadata(chunk_id) {
                Ok(meta) => {
                    found.insert(chunk_id, meta);
                }
                Err(SearchError::ChunkNotFound(missing)) => {
                    warn!(chunk_id = missing, "chunk id is outside the chunk index; skipping");
                }
                Err(error) => return Err(error),
            }
        }

        debug!(requested = chunk_ids.len(), found = found.len(), "fetched chunk metadata");
        Ok(found)
    }

    fn read_text(&mut self, meta: &ChunkMetaData) -> Result<String, SearchError> {
        ChunkStoreReader::read_text(self, meta)
    }
}

fn open_existing(path: &Path) -> Result<File, SearchError> {
    File::open(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => SearchError::NotFound(path.display().to_string()),
        _ => SearchError::Io(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_store(
        dir: &Path,
        chunks: &[(&str, u32, u32)],
        record_size: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = ChunkStoreWriter::create(
            &dir.join("chunks.data"),
            &dir.join("chunks.bin"),
            record_size,
        )?;
        for (chunk_id, (text, doc_id, tokens)) in chunks.iter().enumerate() {
            writer.append(chunk_id as u32, text.as_bytes(), *doc_id, *tokens)?;
        }
        writer.finish()?;
        Ok(())
    }

    fn open_store(dir: &Path, record_size: usize) -> Result<ChunkStoreReader, SearchError> {
        ChunkStoreReader::open(&dir.join("chunks.data"), &dir.join("chunks.bin"), record_size)
    }

    #[test]
    fn record_layout_is_big_endian() {
        let meta = ChunkMetaData {
            chunk_id: 1,
            data_offset: 0x0102,
            data_length: 3,
            source_doc_id: 4,
            token_count: 5,
        };
        let record = meta.encode(MIN_RECORD_SIZE);
        assert_eq!(record.len(), 24);
        assert_eq!(&record[0..4], &[0, 0, 0, 1]);
        assert_eq!(&record[4..12], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(ChunkMetaData::decode(&record), Some(meta));
    }

    #[test]
    fn metadata_and_text_are_readable_by_id() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_store(
            dir.path(),
            &[("first chunk", 7, 2), ("zweiter abschnitt ü", 7, 3), ("third", 9, 1)],
            MIN_RECORD_SIZE,
        )?;

        let mut reader = open_store(dir.path(), MIN_RECORD_SIZE)?;
        assert_eq!(reader.record_count(), 3);

        let meta = reader.read_metadata(1)?;
        assert_eq!(meta.source_doc_id, 7);
        assert_eq!(meta.token_count, 3);
        assert_eq!(meta.data_offset, "first chunk".len() as u64);
        assert_eq!(reader.read_text(&meta)?, "zweiter abschnitt ü");

        let again = reader.read_metadata(1)?;
        assert_eq!(meta, again);
        Ok(())
    }

    #[test]
    fn padded_records_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_store(dir.path(), &[("alpha", 1, 1), ("beta", 2, 1)], 32)?;

        let mut reader = open_store(dir.path(), 32)?;
        assert_eq!(reader.record_count(), 2);
        let meta = reader.read_metadata(1)?;
        assert_eq!(reader.read_text(&meta)?, "beta");
        Ok(())
    }

    #[test]
    fn out_of_range_id_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_store(dir.path(), &[("only", 1, 1)], MIN_RECORD_SIZE)?;

        let mut reader = open_store(dir.path(), MIN_RECORD_SIZE)?;
        assert!(matches!(
            reader.read_metadata(5),
            Err(SearchError::ChunkNotFound(5))
        ));
        Ok(())
    }

    #[test]
    fn mismatched_slot_is_a_corruption_fault() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_store(dir.path(), &[("one", 1, 1), ("two", 1, 1)], MIN_RECORD_SIZE)?;

        let index_path = dir.path().join("chunks.bin");
        let mut bytes = std::fs::read(&index_path)?;
        bytes[MIN_RECORD_SIZE..MIN_RECORD_SIZE + 4].copy_from_slice(&9u32.to_be_bytes());
        std::fs::write(&index_path, bytes)?;

        let mut reader = open_store(dir.path(), MIN_RECORD_SIZE)?;
        let error = reader.read_metadata(1).unwrap_err();
        assert!(matches!(
            error,
            SearchError::ChunkIdMismatch {
                expected: 1,
                found: 9
            }
        ));
        assert!(error.is_corruption());
        assert!(reader.read_metadata_batch(&[0, 1]).is_err());
        Ok(())
    }

    #[test]
    fn partial_trailing_record_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_store(dir.path(), &[("one", 1, 1), ("two", 2, 1)], MIN_RECORD_SIZE)?;

        let index_path = dir.path().join("chunks.bin");
        let mut bytes = std::fs::read(&index_path)?;
        bytes.truncate(MIN_RECORD_SIZE + 10);
        std::fs::write(&index_path, bytes)?;

        let mut reader = open_store(dir.path(), MIN_RECORD_SIZE)?;
        assert_eq!(reader.record_count(), 1);
        assert!(matches!(
            reader.read_metadata(1),
            Err(SearchError::ChunkNotFound(1))
        ));
        Ok(())
    }

    #[test]
    fn batch_lookup_skips_missing_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_store(dir.path(), &[("a b", 1, 2), ("c d", 2, 2)], MIN_RECORD_SIZE)?;

        let mut reader = open_store(dir.path(), MIN_RECORD_SIZE)?;
        let found = reader.read_metadata_batch(&[1, 42, 0, 1])?;
        assert_eq!(found.len(), 2);
        assert_eq!(found[&1].source_doc_id, 2);
        Ok(())
    }

    #[test]
    fn writer_rejects_gaps_in_chunk_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut writer = ChunkStoreWriter::create(
            &dir.path().join("chunks.data"),
            &dir.path().join("chunks.bin"),
            MIN_RECORD_SIZE,
        )?;
        writer.append(0, b"zero", 1, 1)?;
        assert!(matches!(
            writer.append(2, b"two", 1, 1),
            Err(IngestError::OutOfOrderChunk {
                chunk_id: 2,
                expected: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn failed_write_poisons_the_writer() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index_path = dir.path().join("chunks.bin");
        let mut writer = ChunkStoreWriter::create(
            &dir.path().join("chunks.data"),
            &index_path,
            MIN_RECORD_SIZE,
        )?;

        let healthy_index = std::mem::replace(
            &mut writer.index,
            BufWriter::with_capacity(0, File::open(&index_path)?),
        );
        assert!(writer.append(0, b"lost payload", 1, 2).is_err());
        assert!(writer.is_poisoned());

        writer.index = healthy_index;
        assert!(matches!(
            writer.append(0, b"second", 1, 1),
            Err(IngestError::StoreUnusable)
        ));
        assert!(matches!(writer.finish(), Err(IngestError::StoreUnusable)));
        Ok(())
    }

    #[test]
    fn missing_files_are_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(matches!(
            open_store(dir.path(), MIN_RECORD_SIZE),
            Err(SearchError::NotFound(_))
        ));
        Ok(())
    }
}
