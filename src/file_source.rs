use crate::error::{Result, StatsError};
use globset::{GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Builds the ordered list of files to analyze
///
/// Explicit files come first, in the order given, followed by the matches of
/// each glob pattern in sorted order. Exclude patterns are applied last.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    /// Paths given explicitly
    files: Vec<PathBuf>,
    /// Glob patterns to expand
    patterns: Vec<String>,
    /// Exclude patterns set
    exclude_set: Option<GlobSet>,
}

impl FileSource {
    /// Create an empty file source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add explicit file paths
    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files.extend(files);
        self
    }

    /// Add glob patterns, validated up front
    pub fn with_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        for pattern in &patterns {
            glob::Pattern::new(pattern).map_err(|e| StatsError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        self.patterns.extend(patterns);
        Ok(self)
    }

    /// Add exclude patterns
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        if patterns.is_empty() {
            self.exclude_set = None;
            return Ok(self);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = globset::GlobBuilder::new(&pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| StatsError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            builder.add(glob);
        }

        self.exclude_set = Some(builder.build().map_err(|e| {
            StatsError::Config(format!("Failed to build exclude glob set: {}", e))
        })?);
        Ok(self)
    }

    /// Whether no explicit file and no pattern was given
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.patterns.is_empty()
    }

    /// Resolve the file list
    pub fn collect(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|path| !self.is_excluded(path))
            .cloned()
            .collect();

        for pattern in &self.patterns {
            let entries = glob::glob(pattern).map_err(|e| StatsError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

            let mut matches = Vec::new();
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => matches.push(path),
                    Ok(_) => {}
                    // Log error but continue with the other matches
                    Err(e) => warn!(pattern = %pattern, error = %e, "Unreadable glob match"),
                }
            }

            if matches.is_empty() {
                warn!(pattern = %pattern, "Pattern matched no files");
            }
            matches.sort();
            files.extend(matches.into_iter().filter(|path| !self.is_excluded(path)));
        }

        Ok(files)
    }

    /// Check a path against the exclude patterns
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude_set
            .as_ref()
            .is_some_and(|set| set.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["b.xml", "a.xml", "c.txt", "nested/d.xml", "nested/skip.xml"] {
            std::fs::write(dir.path().join(name), "<root/>").unwrap();
        }
        dir
    }

    #[test]
    fn test_explicit_files_keep_order() {
        let files = vec![PathBuf::from("z.xml"), PathBuf::from("a.xml")];
        let source = FileSource::new().with_files(files.clone());
        assert_eq!(source.collect().unwrap(), files);
    }

    #[test]
    fn test_glob_matches_are_sorted_after_explicit_files() {
        let dir = corpus();
        let explicit = dir.path().join("c.txt");
        let pattern = format!("{}/**/*.xml", dir.path().display());

        let source = FileSource::new()
            .with_files(vec![explicit.clone()])
            .with_patterns(vec![pattern])
            .unwrap();
        let files = source.collect().unwrap();

        assert_eq!(
            files,
            vec![
                explicit,
                dir.path().join("a.xml"),
                dir.path().join("b.xml"),
                dir.path().join("nested/d.xml"),
                dir.path().join("nested/skip.xml"),
            ]
        );
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = corpus();
        let pattern = format!("{}/**/*.xml", dir.path().display());

        let source = FileSource::new()
            .with_patterns(vec![pattern])
            .unwrap()
            .with_exclude_patterns(vec!["**/skip.xml".to_string()])
            .unwrap();
        let files = source.collect().unwrap();

        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| !f.ends_with("skip.xml")));
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        assert!(matches!(
            FileSource::new().with_patterns(vec!["[".to_string()]),
            Err(StatsError::InvalidPattern { .. })
        ));
        assert!(matches!(
            FileSource::new().with_exclude_patterns(vec!["a{".to_string()]),
            Err(StatsError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_is_empty() {
        assert!(FileSource::new().is_empty());
        assert!(!FileSource::new().with_files(vec![PathBuf::from("a.xml")]).is_empty());
    }
}
