use crate::chunk_store::ChunkStoreWriter;
use crate::chunking::ChunkingEngine;
use crate::index_builder::IndexBuilder;
use crate::manifest::IndexManifest;
use crate::models::{IndexLayout, IngestionOptions, ParsedDocument};
use crate::traits::Tokenizer;
use crate::IngestError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Files under `folder` whose extension matches `extension`, case-insensitively, sorted.
pub fn discover_input_files(folder: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub documents: usize,
    pub chunks: u64,
    pub tokens: u64,
    pub rejected_chunks: u64,
    pub failed_chunks: u64,
    pub token_count: usize,
    pub skipped_documents: Vec<SkippedDocument>,
}

/// Builds a complete index under `layout` from `documents`.
///
/// Title and text of each document are chunked separately under the same
/// document id. A document whose id is not an unsigned integer is reported as
/// skipped before any of its chunks are written. A chunk store or index
/// failure aborts the build, and no manifest is written for it. The manifest
/// is written last.
pub fn ingest_documents<I, T>(
    documents: I,
    layout: &IndexLayout,
    options: &IngestionOptions,
    tokenizer: T,
) -> Result<IngestionReport, IngestError>
where
    I: IntoIterator<Item = ParsedDocument>,
    T: Tokenizer,
{
    options.validate()?;
    prepare_layout(layout)?;

    let store = ChunkStoreWriter::create(
        &layout.chunk_data_path(),
        &layout.chunk_index_path(),
        options.record_size,
    )?;
    let builder = IndexBuilder::new(options.index.clone(), layout.index_dir());
    let mut engine = ChunkingEngine::new(
        options.chunking,
        tokenizer,
        store,
        builder,
        layout.stats_path(),
    )?;

    let mut report = IngestionReport::default();
    for document in documents {
        if let Err(error) = document.id.trim().parse::<u32>() {
            warn!(doc_id = %document.id, %error, "skipping document with invalid id");
            report.skipped_documents.push(SkippedDocument {
                reason: IngestError::InvalidDocumentId(document.id.clone()).to_string(),
                id: document.id,
            });
            continue;
        }

        engine.process_document(&document.title, &document.id)?;
        engine.process_document(&document.text, &document.id)?;
        engine.end_document()?;
        report.documents += 1;
    }

    let summary = engine.finish()?;
    let compacted = summary
        .builder
        .finish(&layout.compressed_index_path(), &layout.directory_path())?;

    let manifest = IndexManifest::for_layout(
        layout,
        options.record_size,
        compacted.token_count,
        summary.statistics.total_chunks,
    )?;
    manifest.write(layout)?;

    report.chunks = summary.statistics.total_chunks;
    report.tokens = summary.statistics.total_tokens;
    report.rejected_chunks = summary.rejected_chunks;
    report.failed_chunks = summary.failed_chunks;
    report.token_count = compacted.token_count;

    info!(
        root = %layout.root().display(),
        documents = report.documents,
        skipped = report.skipped_documents.len(),
        chunks = report.chunks,
        tokens = report.token_count,
        "ingestion finished"
    );
    Ok(report)
}

/// Creates the layout directories and clears the manifest and stale spill
/// files of any previous build.
fn prepare_layout(layout: &IndexLayout) -> Result<(), IngestError> {
    layout.create_dirs()?;

    match fs::remove_file(layout.manifest_path()) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error.into()),
    }

    for entry in fs::read_dir(layout.index_dir())? {
        let path = entry?.path();
        let is_spill = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("partial_") && name.ends_with(".jsonl"));
        if is_spill {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
