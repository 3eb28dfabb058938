//! Document indexer over a directory of `.txt` files.
//!
//! Walks the data directory, indexes each text file into the
//! `HybridSearchEngine`, and answers retrieval queries by joining the
//! best-matching documents into a single context string.

use super::Retriever;
use crate::config::IndexConfig;
use crate::error::{SearchError, ServiceError};
use crate::search::{HybridSearchEngine, SearchConfig};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Maximum file size to index (1 MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Separator placed between retrieved documents in the context string.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Result of an indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of files indexed.
    pub files_indexed: usize,
    /// Number of files skipped (too large, unreadable, empty).
    pub files_skipped: usize,
    /// Whether an existing persisted index was reused instead of rebuilt.
    pub loaded_existing: bool,
}

/// Retriever backed by a persisted hybrid search index.
#[derive(Clone)]
pub struct DocumentIndexer {
    data_dir: PathBuf,
    top_k: usize,
    engine: Arc<RwLock<HybridSearchEngine>>,
}

impl std::fmt::Debug for DocumentIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndexer")
            .field("data_dir", &self.data_dir)
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl DocumentIndexer {
    /// Open the index at `config.persist_dir`, building it from `config.data_dir`
    /// when it holds no documents yet.
    pub fn build_or_load(config: &IndexConfig) -> Result<(Self, IndexStats), SearchError> {
        let engine = HybridSearchEngine::open(SearchConfig {
            index_path: config.persist_dir.clone(),
            vector_dimensions: config.vector_dimensions,
            full_text_weight: config.full_text_weight,
            vector_weight: config.vector_weight,
            max_results: config.top_k.max(1),
        })?;

        let indexer = Self {
            data_dir: config.data_dir.clone(),
            top_k: config.top_k.max(1),
            engine: Arc::new(RwLock::new(engine)),
        };

        let existing = indexer.document_count()?;
        let stats = if existing > 0 {
            info!(
                documents = existing,
                path = %config.persist_dir.display(),
                "Loaded existing document index"
            );
            IndexStats {
                files_indexed: existing,
                files_skipped: 0,
                loaded_existing: true,
            }
        } else {
            indexer.index_data_dir(false)?
        };

        Ok((indexer, stats))
    }

    /// Drop every indexed document and re-index the data directory, as one commit.
    pub fn rebuild(&self) -> Result<IndexStats, SearchError> {
        self.index_data_dir(true)
    }

    /// Number of documents currently in the index.
    pub fn document_count(&self) -> Result<usize, SearchError> {
        Ok(self.read_engine()?.len())
    }

    fn read_engine(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HybridSearchEngine>, SearchError> {
        self.engine
            .read()
            .map_err(|_| SearchError::IndexError("search engine lock poisoned".to_string()))
    }

    fn write_engine(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HybridSearchEngine>, SearchError> {
        self.engine
            .write()
            .map_err(|_| SearchError::IndexError("search engine lock poisoned".to_string()))
    }

    /// Index every text file under the data directory. The writer lock is
    /// held only for this pass; `replace` clears the index in the same commit.
    fn index_data_dir(&self, replace: bool) -> Result<IndexStats, SearchError> {
        let mut stats = IndexStats::default();

        let files = if self.data_dir.is_dir() {
            collect_text_files(&self.data_dir)?
        } else {
            warn!(
                path = %self.data_dir.display(),
                "Data directory not found; document index is empty"
            );
            Vec::new()
        };
        if files.is_empty() && !replace {
            return Ok(stats);
        }

        let mut engine = self.write_engine()?;
        let mut batch = engine.batch()?;
        if replace {
            batch.clear()?;
        }
        for path in files {
            let doc_id = relative_id(&self.data_dir, &path);
            match read_document(&path) {
                Some(content) => {
                    batch.add_document(&doc_id, &content)?;
                    stats.files_indexed += 1;
                }
                None => {
                    debug!(file = %doc_id, "Skipping file");
                    stats.files_skipped += 1;
                }
            }
        }
        batch.commit()?;

        info!(
            indexed = stats.files_indexed,
            skipped = stats.files_skipped,
            path = %self.data_dir.display(),
            "Built document index"
        );
        Ok(stats)
    }

    /// Blocking retrieval; [`Retriever::retrieve`] runs this off the async runtime.
    pub fn retrieve_blocking(&self, query: &str) -> Result<String, SearchError> {
        let engine = self.read_engine()?;
        let hits = engine.search(query)?;
        let context = hits
            .into_iter()
            .filter(|hit| !hit.content.trim().is_empty())
            .take(self.top_k)
            .map(|hit| hit.content)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        Ok(context)
    }
}

#[async_trait]
impl Retriever for DocumentIndexer {
    async fn retrieve(&self, query: &str) -> Result<String, ServiceError> {
        let this = self.clone();
        let query = query.to_string();
        let context = tokio::task::spawn_blocking(move || this.retrieve_blocking(&query))
            .await
            .map_err(|e| ServiceError::Index {
                message: format!("Retrieval task failed: {}", e),
            })??;
        debug!(context_len = context.len(), "Retrieved context");
        Ok(context)
    }
}

/// All `.txt` files below `dir`, sorted for a stable indexing order.
fn collect_text_files(dir: &Path) -> Result<Vec<PathBuf>, SearchError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| SearchError::CorpusError(e.to_string()))?;
        let path = entry.path();
        let is_txt = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
        if entry.file_type().is_file() && is_txt {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn read_document(path: &Path) -> Option<String> {
    let size = std::fs::metadata(path).ok()?.len();
    if size > MAX_FILE_SIZE {
        return None;
    }
    let content = std::fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    Some(content)
}

fn relative_id(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn index_config(root: &Path) -> IndexConfig {
        IndexConfig {
            data_dir: root.join("data"),
            persist_dir: root.join("index"),
            vector_dimensions: 64,
            full_text_weight: 0.5,
            vector_weight: 0.5,
            top_k: 2,
        }
    }

    fn write_corpus(root: &Path) {
        let data = root.join("data");
        std::fs::create_dir_all(data.join("science")).unwrap();
        std::fs::write(
            data.join("python.txt"),
            "Python is a high-level programming language.",
        )
        .unwrap();
        std::fs::write(
            data.join("science").join("cells.txt"),
            "Cells are the basic structural unit of all organisms.",
        )
        .unwrap();
        std::fs::write(data.join("notes.md"), "Python markdown is ignored.").unwrap();
        std::fs::write(data.join("empty.txt"), "   \n").unwrap();
    }

    #[test]
    fn test_build_indexes_txt_files_only() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());

        let (indexer, stats) = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();
        assert_eq!(
            stats,
            IndexStats {
                files_indexed: 2,
                files_skipped: 1,
                loaded_existing: false,
            }
        );
        assert_eq!(indexer.document_count().unwrap(), 2);
    }

    #[test]
    fn test_second_open_loads_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        {
            let _ = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();
        }

        let (indexer, stats) = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();
        assert!(stats.loaded_existing);
        assert_eq!(stats.files_indexed, 2);
        let context = indexer.retrieve_blocking("What is Python?").unwrap();
        assert!(context.contains("Python is a high-level programming language."));
    }

    #[test]
    fn test_missing_data_dir_gives_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        let (indexer, stats) = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();
        assert_eq!(stats.files_indexed, 0);
        assert_eq!(indexer.retrieve_blocking("anything").unwrap(), "");
    }

    #[test]
    fn test_rebuild_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (indexer, _) = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();

        std::fs::write(
            dir.path().join("data").join("gravity.txt"),
            "Gravity is the force that attracts masses.",
        )
        .unwrap();
        let stats = indexer.rebuild().unwrap();
        assert_eq!(stats.files_indexed, 3);
        assert_eq!(indexer.document_count().unwrap(), 3);
    }

    #[test]
    fn test_same_index_opened_twice() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let config = index_config(dir.path());

        let (serving, _) = DocumentIndexer::build_or_load(&config).unwrap();
        let (maintenance, stats) = DocumentIndexer::build_or_load(&config).unwrap();
        assert!(stats.loaded_existing);

        std::fs::remove_file(dir.path().join("data").join("python.txt")).unwrap();
        let stats = maintenance.rebuild().unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(maintenance.document_count().unwrap(), 1);

        let context = serving.retrieve_blocking("organisms cells").unwrap();
        assert!(context.starts_with("Cells are the basic structural unit of all organisms."));
    }

    #[test]
    fn test_rebuild_with_missing_data_dir_empties_index() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (indexer, _) = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();

        std::fs::remove_dir_all(dir.path().join("data")).unwrap();
        let stats = indexer.rebuild().unwrap();
        assert_eq!(stats, IndexStats::default());
        assert_eq!(indexer.document_count().unwrap(), 0);
        assert_eq!(indexer.retrieve_blocking("Python").unwrap(), "");
    }

    #[tokio::test]
    async fn test_retrieve_returns_best_document_first() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path());
        let (indexer, _) = DocumentIndexer::build_or_load(&index_config(dir.path())).unwrap();

        let context = indexer.retrieve("organisms cells").await.unwrap();
        assert!(context.starts_with("Cells are the basic structural unit of all organisms."));
    }

    #[test]
    fn test_relative_id() {
        let root = Path::new("/data");
        assert_eq!(
            relative_id(root, Path::new("/data/science/cells.txt")),
            "science/cells.txt"
        );
    }
}
