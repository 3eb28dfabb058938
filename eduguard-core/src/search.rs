//! # Hybrid document search
//!
//! Every document lives in two places: a Tantivy index on disk (BM25 scoring)
//! and an in-memory table of hashed term vectors (cosine scoring). A query is
//! scored by both and the two scores are blended with configurable weights.
//!
//! The vectors are hashed term counts rather than model embeddings, so the
//! index works fully offline. They are rebuilt from stored documents on open.

use crate::error::SearchError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term, doc};

/// Heap handed to the Tantivy writer.
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Settings for [`HybridSearchEngine`].
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Directory holding the Tantivy index.
    pub index_path: PathBuf,
    pub vector_dimensions: usize,
    pub full_text_weight: f32,
    pub vector_weight: f32,
    /// Upper bound on hits returned per query.
    pub max_results: usize,
}

/// One document matched by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: String,
    pub content: String,
    pub text_score: f32,
    pub vector_score: f32,
    /// Weighted blend of the two scores; hits are ordered by it.
    pub score: f32,
}

// ---------------------------------------------------------------------------
// Hashed term vectors
// ---------------------------------------------------------------------------

/// Maps text to a fixed-size, L2-normalised vector of hashed term counts.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed `text`. Text without alphanumeric terms maps to the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for term in terms(text) {
            vector[fnv1a(&term) as usize % self.dimensions] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

/// Lowercased alphanumeric runs of `text`.
fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(term: &str) -> u64 {
    term.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Cosine of the angle between `a` and `b`; zero for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sa, sb), (x, y)| {
            (dot + x * y, sa + x * x, sb + y * y)
        });
    if sq_a == 0.0 || sq_b == 0.0 {
        return 0.0;
    }
    dot / (sq_a.sqrt() * sq_b.sqrt())
}

/// Reduce free text to plain terms Tantivy's query parser always accepts.
fn plain_terms(query: &str) -> String {
    terms(query).collect::<Vec<_>>().join(" ")
}

fn index_error(action: &'static str) -> impl Fn(tantivy::TantivyError) -> SearchError {
    move |e| SearchError::IndexError(format!("{}: {}", action, e))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Fields {
    id: Field,
    content: Field,
}

struct StoredVector {
    content: String,
    embedding: Vec<f32>,
}

/// Full-text plus vector search over a persisted document set.
///
/// The engine itself only reads, so any number of engines may be open on the
/// same directory. Writes go through an [`IndexBatch`], which holds Tantivy's
/// single-writer lock until it is committed or dropped.
pub struct HybridSearchEngine {
    config: SearchConfig,
    index: Index,
    reader: IndexReader,
    fields: Fields,
    embedder: HashedEmbedder,
    vectors: BTreeMap<String, StoredVector>,
}

impl std::fmt::Debug for HybridSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridSearchEngine")
            .field("index_path", &self.config.index_path)
            .field("documents", &self.vectors.len())
            .finish()
    }
}

impl HybridSearchEngine {
    /// Open the index at `config.index_path`, creating it when absent.
    pub fn open(config: SearchConfig) -> Result<Self, SearchError> {
        let mut builder = Schema::builder();
        let fields = Fields {
            id: builder.add_text_field("id", STRING | STORED),
            content: builder.add_text_field("content", TEXT | STORED),
        };
        let schema = builder.build();

        std::fs::create_dir_all(&config.index_path).map_err(|e| {
            SearchError::IndexError(format!(
                "cannot create {}: {}",
                config.index_path.display(),
                e
            ))
        })?;

        let index = match Index::open_in_dir(&config.index_path) {
            Ok(index) => index,
            Err(_) => Index::create_in_dir(&config.index_path, schema)
                .map_err(index_error("creating index"))?,
        };
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_error("opening reader"))?;

        let mut engine = Self {
            embedder: HashedEmbedder::new(config.vector_dimensions),
            config,
            index,
            reader,
            fields,
            vectors: BTreeMap::new(),
        };
        engine.reload_vectors()?;
        Ok(engine)
    }

    fn reload_vectors(&mut self) -> Result<(), SearchError> {
        let searcher = self.reader.searcher();
        let addresses = searcher
            .search(&tantivy::query::AllQuery, &DocSetCollector)
            .map_err(index_error("scanning index"))?;

        self.vectors.clear();
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_error("reading document"))?;
            let (doc_id, content) = self.stored(&doc);
            let embedding = self.embedder.embed(&content);
            self.vectors
                .insert(doc_id, StoredVector { content, embedding });
        }
        Ok(())
    }

    fn stored(&self, doc: &TantivyDocument) -> (String, String) {
        let text = |field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        (text(self.fields.id), text(self.fields.content))
    }

    /// Take the writer lock for a batch of changes.
    ///
    /// Fails with a `LockBusy` index error while another batch, in this
    /// process or another, is open on the same directory.
    pub fn batch(&mut self) -> Result<IndexBatch<'_>, SearchError> {
        let writer = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .map_err(index_error("opening writer"))?;
        Ok(IndexBatch {
            engine: self,
            writer,
            staged: BTreeMap::new(),
            cleared: false,
        })
    }

    /// BM25 matches for `query`. Queries Tantivy cannot parse are retried as plain terms.
    pub fn text_hits(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let parsed = match parser.parse_query(query) {
            Ok(parsed) => parsed,
            Err(_) => {
                let plain = plain_terms(query);
                if plain.is_empty() {
                    return Ok(Vec::new());
                }
                parser
                    .parse_query(&plain)
                    .map_err(|e| SearchError::IndexError(format!("parsing query: {}", e)))?
            }
        };

        let searcher = self.reader.searcher();
        let top = searcher
            .search(&parsed, &TopDocs::with_limit(self.config.max_results))
            .map_err(index_error("searching"))?;

        top.into_iter()
            .map(|(score, address)| {
                let doc: TantivyDocument =
                    searcher.doc(address).map_err(index_error("reading document"))?;
                let (doc_id, content) = self.stored(&doc);
                Ok(SearchHit {
                    doc_id,
                    content,
                    text_score: score,
                    vector_score: 0.0,
                    score,
                })
            })
            .collect()
    }

    /// Documents whose term vector points the same way as the query's.
    pub fn vector_hits(&self, query: &str) -> Vec<SearchHit> {
        let query_vector = self.embedder.embed(query);
        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .filter_map(|(doc_id, stored)| {
                let similarity = cosine_similarity(&query_vector, &stored.embedding);
                (similarity > 0.0).then(|| SearchHit {
                    doc_id: doc_id.clone(),
                    content: stored.content.clone(),
                    text_score: 0.0,
                    vector_score: similarity,
                    score: similarity,
                })
            })
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(self.config.max_results);
        hits
    }

    /// Blend text and vector matches. Ties are broken by document id.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let mut blended: BTreeMap<String, SearchHit> = BTreeMap::new();
        for hit in self.text_hits(query)? {
            blended.insert(hit.doc_id.clone(), hit);
        }
        for hit in self.vector_hits(query) {
            let vector_score = hit.vector_score;
            blended
                .entry(hit.doc_id.clone())
                .and_modify(|existing| existing.vector_score = vector_score)
                .or_insert(SearchHit { text_score: 0.0, ..hit });
        }

        let mut hits: Vec<SearchHit> = blended
            .into_values()
            .map(|mut hit| {
                hit.score = hit.text_score * self.config.full_text_weight
                    + hit.vector_score * self.config.vector_weight;
                hit
            })
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(self.config.max_results);
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Pending writes against a [`HybridSearchEngine`].
///
/// Nothing is visible to searches until [`commit`](Self::commit). Dropping an
/// uncommitted batch discards it and releases the lock.
pub struct IndexBatch<'a> {
    engine: &'a mut HybridSearchEngine,
    writer: IndexWriter,
    staged: BTreeMap<String, StoredVector>,
    cleared: bool,
}

impl IndexBatch<'_> {
    /// Stage `content` under `doc_id`, replacing any previous version.
    pub fn add_document(&mut self, doc_id: &str, content: &str) -> Result<(), SearchError> {
        let fields = self.engine.fields;
        self.writer
            .delete_term(Term::from_field_text(fields.id, doc_id));
        self.writer
            .add_document(doc!(
                fields.id => doc_id,
                fields.content => content,
            ))
            .map_err(index_error("adding document"))?;

        self.staged.insert(
            doc_id.to_string(),
            StoredVector {
                content: content.to_string(),
                embedding: self.engine.embedder.embed(content),
            },
        );
        Ok(())
    }

    /// Stage removal of every document, including those added earlier in
    /// this batch.
    pub fn clear(&mut self) -> Result<(), SearchError> {
        self.writer
            .delete_all_documents()
            .map_err(index_error("clearing index"))?;
        self.staged.clear();
        self.cleared = true;
        Ok(())
    }

    /// Persist the batch, release the writer lock and make the changes searchable.
    pub fn commit(mut self) -> Result<(), SearchError> {
        self.writer.commit().map_err(index_error("committing"))?;
        let IndexBatch {
            engine,
            writer,
            staged,
            cleared,
        } = self;
        drop(writer);

        engine
            .reader
            .reload()
            .map_err(index_error("reloading reader"))?;
        if cleared {
            engine.vectors.clear();
        }
        engine.vectors.extend(staged);
        Ok(())
    }
}

/// Highest score first; stable, so equal scores keep their id order.
fn sort_by_score(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_in(dir: &tempfile::TempDir) -> HybridSearchEngine {
        HybridSearchEngine::open(SearchConfig {
            index_path: dir.path().join("index"),
            vector_dimensions: 64,
            full_text_weight: 0.5,
            vector_weight: 0.5,
            max_results: 10,
        })
        .unwrap()
    }

    fn put(engine: &mut HybridSearchEngine, doc_id: &str, content: &str) {
        let mut batch = engine.batch().unwrap();
        batch.add_document(doc_id, content).unwrap();
        batch.commit().unwrap();
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let v = HashedEmbedder::new(32).embed("photosynthesis converts light into chemical energy");
        assert_eq!(v.len(), 32);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embedding_ignores_case_and_punctuation() {
        let e = HashedEmbedder::new(64);
        assert_eq!(e.embed("Cells, cells!"), e.embed("cells cells"));
        assert!(e.embed("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_plain_terms() {
        assert_eq!(plain_terms("What is \"Python\"?"), "what is python");
        assert_eq!(plain_terms("(( ]]"), "");
    }

    #[test]
    fn test_best_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir);
        put(&mut engine, "python.txt", "Python is a programming language");
        put(&mut engine, "biology.txt", "Cells are the basic unit of life");

        let hits = engine.search("What is Python?").unwrap();
        assert_eq!(hits[0].doc_id, "python.txt");
        assert_eq!(hits[0].content, "Python is a programming language");
        assert!(hits[0].text_score > 0.0 && hits[0].vector_score > 0.0);
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_reindexing_an_id_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir);
        put(&mut engine, "a.txt", "old text about rust");
        put(&mut engine, "a.txt", "new text about rust");

        let hits = engine.text_hits("rust").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "new text about rust");
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_reopen_rebuilds_vectors_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut engine = engine_in(&dir);
            put(&mut engine, "gravity.txt", "Gravity pulls objects toward each other");
        }

        let engine = engine_in(&dir);
        assert_eq!(engine.len(), 1);
        let hits = engine.vector_hits("gravity objects");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "gravity.txt");
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir);
        put(&mut engine, "a.txt", "alpha beta");
        let mut batch = engine.batch().unwrap();
        batch.clear().unwrap();
        batch.commit().unwrap();
        assert!(engine.is_empty());
        assert!(engine.search("alpha").unwrap().is_empty());
    }

    #[test]
    fn test_query_syntax_characters_fall_back_to_terms() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir);
        put(&mut engine, "a.txt", "the mitochondria");
        let hits = engine.search("what is \"the mitochondria ((").unwrap();
        assert_eq!(hits[0].doc_id, "a.txt");
    }

    #[test]
    fn test_engines_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = engine_in(&dir);
        put(&mut first, "a.txt", "volcanoes erupt molten rock");

        let mut second = engine_in(&dir);
        assert_eq!(second.len(), 1);
        put(&mut second, "b.txt", "glaciers carve valleys");
        assert_eq!(second.len(), 2);

        // The first engine keeps serving its own snapshot.
        assert_eq!(first.search("volcanoes").unwrap()[0].doc_id, "a.txt");
        put(&mut first, "c.txt", "rivers deposit silt");
    }

    #[test]
    fn test_open_batch_holds_the_writer_lock() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = engine_in(&dir);
        let mut second = engine_in(&dir);

        let batch = first.batch().unwrap();
        assert!(second.batch().is_err());
        drop(batch);
        assert!(second.batch().is_ok());
    }

    #[test]
    fn test_uncommitted_batch_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir);
        {
            let mut batch = engine.batch().unwrap();
            batch.add_document("a.txt", "never committed").unwrap();
        }
        assert!(engine.is_empty());
        assert!(engine.search("committed").unwrap().is_empty());
    }

    #[test]
    fn test_clear_then_add_in_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir);
        put(&mut engine, "old.txt", "stale lesson notes");

        let mut batch = engine.batch().unwrap();
        batch.clear().unwrap();
        batch.add_document("new.txt", "fresh lesson notes").unwrap();
        batch.commit().unwrap();

        assert_eq!(engine.len(), 1);
        let hits = engine.search("lesson notes").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "new.txt");
    }

    #[test]
    fn test_empty_index_has_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        assert!(engine_in(&dir).search("anything").unwrap().is_empty());
    }
}
