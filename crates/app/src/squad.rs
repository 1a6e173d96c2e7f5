use anyhow::Context;
use chunk_search_core::{discover_input_files, ParsedDocument};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct SquadFile {
    data: Vec<SquadArticle>,
}

#[derive(Debug, Deserialize)]
struct SquadArticle {
    title: String,
    paragraphs: Vec<SquadParagraph>,
}

#[derive(Debug, Deserialize)]
struct SquadParagraph {
    #[serde(default)]
    context: String,
}

/// Reads SQuAD-format JSON into one lowercased document per paragraph.
///
/// Document ids come from a counter that keeps running across files. Empty
/// paragraphs are skipped without consuming an id.
#[derive(Debug, Default)]
pub struct SquadReader {
    max_docs: Option<usize>,
    next_id: usize,
}

impl SquadReader {
    pub fn new(max_docs: Option<usize>) -> Self {
        Self {
            max_docs: max_docs.filter(|limit| *limit > 0),
            next_id: 0,
        }
    }

    fn limit_reached(&self) -> bool {
        self.max_docs.is_some_and(|limit| self.next_id >= limit)
    }

    /// A single `.json` file, or every `.json` file below a folder.
    pub fn input_files(data: &Path) -> anyhow::Result<Vec<PathBuf>> {
        if data.is_file() {
            return Ok(vec![data.to_path_buf()]);
        }

        let files = discover_input_files(data, "json");
        if files.is_empty() {
            anyhow::bail!("no json files found in {}", data.display());
        }
        Ok(files)
    }

    pub fn read_file(&mut self, path: &Path) -> anyhow::Result<Vec<ParsedDocument>> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let squad: SquadFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing SQuAD json {}", path.display()))?;

        let mut documents = Vec::new();
        'articles: for article in squad.data {
            let title = article.title.to_lowercase();
            for paragraph in article.paragraphs {
                if self.limit_reached() {
                    info!(limit = ?self.max_docs, "reached max docs limit");
                    break 'articles;
                }
                if paragraph.context.is_empty() {
                    warn!(title = %title, "skipping empty context");
                    continue;
                }

                documents.push(ParsedDocument {
                    id: self.next_id.to_string(),
                    title: title.clone(),
                    text: paragraph.context.to_lowercase(),
                });
                self.next_id += 1;
            }
        }

        info!(path = %path.display(), documents = documents.len(), "parsed SQuAD file");
        Ok(documents)
    }

    pub fn read_all(&mut self, data: &Path) -> anyhow::Result<Vec<ParsedDocument>> {
        let mut documents = Vec::new();
        for path in Self::input_files(data)? {
            if self.limit_reached() {
                break;
            }
            documents.extend(self.read_file(&path)?);
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::SquadReader;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "version": "1.1",
        "data": [
            {
                "title": "Super_Bowl_50",
                "paragraphs": [
                    {"context": "Super Bowl 50 was an American football game.", "qas": []},
                    {"context": "", "qas": []},
                    {"context": "The Broncos defeated the Panthers.", "qas": []}
                ]
            },
            {
                "title": "Normans",
                "paragraphs": [{"context": "The Normans gave their name to Normandy."}]
            }
        ]
    }"#;

    #[test]
    fn paragraphs_become_lowercased_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("squad-dev.json");
        fs::write(&path, SAMPLE)?;

        let documents = SquadReader::new(None).read_all(&path)?;
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[0].id, "0");
        assert_eq!(documents[0].title, "super_bowl_50");
        assert_eq!(documents[1].id, "1");
        assert_eq!(documents[1].text, "the broncos defeated the panthers.");
        assert_eq!(documents[2].title, "normans");
        assert_eq!(documents[2].id, "2");
        Ok(())
    }

    #[test]
    fn max_docs_stops_early() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("squad.json");
        fs::write(&path, SAMPLE)?;

        let documents = SquadReader::new(Some(2)).read_all(&path)?;
        let ids: Vec<&str> = documents.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
        Ok(())
    }

    #[test]
    fn ids_keep_counting_across_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.json"), SAMPLE)?;
        fs::write(dir.path().join("b.json"), SAMPLE)?;

        let documents = SquadReader::new(None).read_all(dir.path())?;
        assert_eq!(documents.len(), 6);
        assert_eq!(documents[5].id, "5");
        Ok(())
    }

    #[test]
    fn folder_without_json_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(SquadReader::new(None).read_all(dir.path()).is_err());
        Ok(())
    }
}
