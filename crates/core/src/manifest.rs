//! Index manifest and corpus statistics files.
//!
//! The manifest names every file of one index build relative to the layout
//! root. It is written last, through a temporary file and a rename, so a
//! present manifest always describes a complete build.

use crate::error::{IngestError, SearchError};
use crate::models::{CorpusStatistics, IndexLayout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    pub format_version: u32,
    pub index_file: String,
    pub directory_file: String,
    pub stats_file: String,
    pub chunk_data_file: String,
    pub chunk_index_file: String,
    pub record_size: usize,
    pub index_sha256: String,
    pub token_count: usize,
    pub total_chunks: u64,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    /// Current manifest format version.
    pub const FORMAT_VERSION: u32 = 1;

    /// Describes a finished build using the layout's default file names.
    pub fn for_layout(
        layout: &IndexLayout,
        record_size: usize,
        token_count: usize,
        total_chunks: u64,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            format_version: Self::FORMAT_VERSION,
            index_file: IndexLayout::COMPRESSED_INDEX_FILE.to_string(),
            directory_file: IndexLayout::DIRECTORY_FILE.to_string(),
            stats_file: IndexLayout::STATS_FILE.to_string(),
            chunk_data_file: IndexLayout::CHUNK_DATA_FILE.to_string(),
            chunk_index_file: IndexLayout::CHUNK_INDEX_FILE.to_string(),
            record_size,
            index_sha256: sha256_file(&layout.compressed_index_path())?,
            token_count,
            total_chunks,
            built_at: Utc::now(),
        })
    }

    pub fn write(&self, layout: &IndexLayout) -> Result<(), IngestError> {
        let path = layout.manifest_path();
        let tmp_path = path.with_extension("json.tmp");

        let mut file = File::create(&tmp_path)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn load(layout: &IndexLayout) -> Result<Self, SearchError> {
        let path = layout.manifest_path();
        let file = File::open(&path).map_err(|error| not_found_or_io(error, &path))?;
        let manifest: Self = serde_json::from_reader(BufReader::new(file))?;

        if manifest.format_version != Self::FORMAT_VERSION {
            return Err(SearchError::UnsupportedFormat {
                found: manifest.format_version,
                expected: Self::FORMAT_VERSION,
            });
        }
        Ok(manifest)
    }

    /// Recomputes the compressed index checksum and compares it to the recorded one.
    pub fn verify(&self, layout: &IndexLayout) -> Result<(), SearchError> {
        let path = layout.resolve(&self.index_file);
        let actual = sha256_file(&path).map_err(|error| not_found_or_io(error, &path))?;
        if actual != self.index_sha256 {
            return Err(SearchError::Corruption(format!(
                "checksum mismatch for {}: manifest {}, file {actual}",
                path.display(),
                self.index_sha256
            )));
        }
        Ok(())
    }
}

pub fn write_statistics(path: &Path, stats: &CorpusStatistics) -> Result<(), IngestError> {
    let mut file = File::create(path)?;
    serde_json::to_writer(&mut file, stats)?;
    file.sync_all()?;
    Ok(())
}

pub fn load_statistics(path: &Path) -> Result<CorpusStatistics, SearchError> {
    let file = File::open(path).map_err(|error| not_found_or_io(error, path))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn not_found_or_io(error: io::Error, path: &Path) -> SearchError {
    match error.kind() {
        io::ErrorKind::NotFound => SearchError::NotFound(path.display().to_string()),
        _ => SearchError::Io(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout_with_index(
        contents: &str,
    ) -> Result<(tempfile::TempDir, IndexLayout), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = IndexLayout::new(dir.path());
        layout.create_dirs()?;
        fs::write(layout.compressed_index_path(), contents)?;
        Ok((dir, layout))
    }

    #[test]
    fn manifest_round_trips_through_disk() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, layout) = layout_with_index("{\"a\":[0,1]}\n")?;
        let manifest = IndexManifest::for_layout(&layout, 24, 1, 1)?;
        manifest.write(&layout)?;

        let loaded = IndexManifest::load(&layout)?;
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.index_file, "index/inverted_index_delta_encoded.json");
        loaded.verify(&layout)?;
        Ok(())
    }

    #[test]
    fn tampered_index_fails_verification() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, layout) = layout_with_index("{\"a\":[0,1]}\n")?;
        let manifest = IndexManifest::for_layout(&layout, 24, 1, 1)?;
        fs::write(layout.compressed_index_path(), "{\"a\":[0,2]}\n")?;

        let error = manifest.verify(&layout).unwrap_err();
        assert!(error.is_corruption());
        Ok(())
    }

    #[test]
    fn unknown_format_versions_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, layout) = layout_with_index("")?;
        let mut manifest = IndexManifest::for_layout(&layout, 24, 0, 0)?;
        manifest.format_version = 7;
        manifest.write(&layout)?;

        assert!(matches!(
            IndexManifest::load(&layout),
            Err(SearchError::UnsupportedFormat { found: 7, expected: 1 })
        ));
        Ok(())
    }

    #[test]
    fn missing_statistics_are_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("stats.json");
        assert!(matches!(load_statistics(&path), Err(SearchError::NotFound(_))));

        let stats = CorpusStatistics::from_totals(2, 30);
        write_statistics(&path, &stats)?;
        assert_eq!(load_statistics(&path)?, stats);
        Ok(())
    }
}
