use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use xml_stats::{BatchDispatcher, CorpusStatistics, DispatchConfig, TaskSpawner};

/// A temporary directory holding XML documents
pub struct Corpus {
    pub dir: TempDir,
    pub files: Vec<PathBuf>,
}

impl Corpus {
    /// Write each `(name, content)` pair; `files` keeps the given order
    pub async fn new(documents: &[(&str, &str)]) -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        let mut files = Vec::with_capacity(documents.len());
        for (name, content) in documents {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, content).await?;
            files.push(path);
        }
        Ok(Self { dir, files })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// A corpus of `count` small well-formed documents with varied content
pub async fn varied_corpus(count: usize) -> std::io::Result<Corpus> {
    let documents: Vec<(String, String)> = (0..count)
        .map(|i| {
            let name = format!("doc{:03}.xml", i);
            let content = format!(
                r#"<?xml version="1.0"?>
<catalog edition="{}">
  <book id="b{}" lang="{}"><title>Book {}</title></book>
  {}
</catalog>"#,
                i % 3,
                i,
                if i % 2 == 0 { "en" } else { "fr" },
                i,
                if i % 4 == 0 { r#"<note kind="x"/>"# } else { "" }
            );
            (name, content)
        })
        .collect();
    let borrowed: Vec<(&str, &str)> = documents
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_str()))
        .collect();
    Corpus::new(&borrowed).await
}

/// Run files through in-process workers
pub async fn collect_in_process(
    files: Vec<PathBuf>,
    batch_size: usize,
) -> xml_stats::error::Result<CorpusStatistics> {
    let config = DispatchConfig {
        batch_size,
        ..DispatchConfig::default()
    };
    BatchDispatcher::new(Arc::new(TaskSpawner::new()), config)?
        .collect(files)
        .await
}
