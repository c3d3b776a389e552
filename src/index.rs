//! Per-project vector store
//!
//! Every project keeps one `Index` holding an embedding per message and
//! the last observed modification time of every session file it came
//! from. Indexes are persisted as a checksummed bincode blob and scanned
//! exhaustively at query time.

use crate::config::{Config, INDEX_EXTENSION};
use crate::error::{Result, SgrepError};
use crate::transcript::{truncate_chars, Message, Role};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Leading bytes of every index file
const MAGIC: &[u8; 4] = b"SGIX";

/// Bumped whenever the serialized layout changes
const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 32;

/// One embedded message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Session the message belongs to
    pub session_id: String,
    /// Ordinal of the message within its session
    pub index: usize,
    /// Author of the message
    pub role: Role,
    /// Second-precision timestamp, possibly empty
    pub timestamp: String,
    /// Leading characters of the message text
    pub preview: String,
    /// Session file the message came from
    pub file_path: PathBuf,
    /// Embedding of the (truncated) message text
    pub vector: Vec<f32>,
}

impl IndexEntry {
    /// Build an entry for `message` with its embedding
    pub fn from_message(message: &Message, preview_len: usize, vector: Vec<f32>) -> Self {
        Self {
            session_id: message.session_id.clone(),
            index: message.index,
            role: message.role,
            timestamp: message.timestamp.clone(),
            preview: truncate_chars(&message.text, preview_len).to_string(),
            file_path: message.file_path.clone(),
            vector,
        }
    }
}

/// Last observed state of one session file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: PathBuf,
    pub last_modified: SystemTime,
}

/// All entries and file metadata of one project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Project directory name
    pub project: String,
    /// Embedded messages in insertion order
    pub entries: Vec<IndexEntry>,
    /// Recorded files keyed by path
    pub files: BTreeMap<PathBuf, FileMetadata>,
}

impl Index {
    /// Create an empty index for `project`
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    /// Append an entry
    pub fn add_entry(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Evict every entry and the metadata of `file_path`
    ///
    /// Returns the number of entries removed.
    pub fn remove_file(&mut self, file_path: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.file_path != file_path);
        self.files.remove(file_path);

        let removed = before - self.entries.len();
        debug!("Evicted {} entries of {}", removed, file_path.display());
        removed
    }

    /// Recorded state of `file_path`, if it was indexed
    pub fn file_metadata(&self, file_path: &Path) -> Option<&FileMetadata> {
        self.files.get(file_path)
    }

    /// Record the modification time observed for `file_path`
    pub fn record_file(&mut self, file_path: &Path, last_modified: SystemTime) {
        self.files.insert(
            file_path.to_path_buf(),
            FileMetadata {
                file_path: file_path.to_path_buf(),
                last_modified,
            },
        );
    }

    /// Paths of all recorded files
    pub fn indexed_files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    /// Get total number of entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get total number of recorded files
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Aggregate figures over every persisted index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub projects: usize,
    /// Distinct session files across all projects
    pub files: usize,
    pub vectors: usize,
    /// Bytes on disk
    pub size_bytes: u64,
}

/// Loads and persists project indexes under the index directory
#[derive(Debug, Clone)]
pub struct VectorStore {
    index_dir: PathBuf,
}

impl VectorStore {
    /// Create a store rooted at the configured index directory
    pub fn new(config: &Config) -> Self {
        Self::at(&config.index_dir)
    }

    /// Create a store rooted at `index_dir`
    pub fn at(index_dir: &Path) -> Self {
        Self {
            index_dir: index_dir.to_path_buf(),
        }
    }

    fn index_path(&self, project: &str) -> PathBuf {
        self.index_dir
            .join(format!("{}.{}", project, INDEX_EXTENSION))
    }

    /// Load the index of `project`
    ///
    /// A missing file gives an empty index; an unreadable or corrupt one
    /// is logged and also gives an empty index.
    pub fn load(&self, project: &str) -> Index {
        let path = self.index_path(project);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index for {} yet", project);
                return Index::new(project);
            }
            Err(e) => {
                warn!("Cannot read index {}: {}; starting fresh", path.display(), e);
                return Index::new(project);
            }
        };

        match decode(&data) {
            Ok(mut index) => {
                index.project = project.to_string();
                debug!(
                    "Loaded {} vectors from {} files for {}",
                    index.entry_count(),
                    index.file_count(),
                    project
                );
                index
            }
            Err(e) => {
                warn!("Discarding corrupt index {}: {}", path.display(), e);
                Index::new(project)
            }
        }
    }

    /// Persist `index`, replacing any previous version atomically
    pub fn save(&self, index: &Index) -> Result<()> {
        std::fs::create_dir_all(&self.index_dir)?;

        let path = self.index_path(&index.project);
        let tmp_path = path.with_extension(format!("{}.tmp", INDEX_EXTENSION));

        std::fs::write(&tmp_path, encode(index)?)?;
        std::fs::rename(&tmp_path, &path)?;

        info!(
            "Saved {} vectors, {} files to {}",
            index.entry_count(),
            index.file_count(),
            path.display()
        );
        Ok(())
    }

    /// Names of all projects with a persisted index, sorted
    pub fn projects(&self) -> Result<Vec<String>> {
        let read_dir = match std::fs::read_dir(&self.index_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects: Vec<String> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(INDEX_EXTENSION)
            })
            .filter_map(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .collect();

        projects.sort();
        Ok(projects)
    }

    /// Aggregate statistics over all persisted indexes
    pub fn stats(&self) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        let mut files = HashSet::new();

        for project in self.projects()? {
            let path = self.index_path(&project);
            stats.projects += 1;
            stats.size_bytes += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            let index = self.load(&project);
            stats.vectors += index.entry_count();
            files.extend(index.files.into_keys());
        }

        stats.files = files.len();
        Ok(stats)
    }
}

/// Serialize `index` into the checksummed on-disk layout
pub fn encode(index: &Index) -> Result<Vec<u8>> {
    let payload = bincode::serialize(index)?;
    let checksum = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&checksum);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse the on-disk layout produced by [`encode`]
pub fn decode(data: &[u8]) -> Result<Index> {
    if data.len() < HEADER_LEN || &data[..4] != MAGIC {
        return Err(SgrepError::Index("not an index file".to_string()));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FORMAT_VERSION {
        return Err(SgrepError::Index(format!(
            "unsupported index version {}",
            version
        )));
    }

    let expected = &data[6..HEADER_LEN];
    let payload = &data[HEADER_LEN..];
    let actual = Sha256::digest(payload);
    if actual.as_slice() != expected {
        return Err(SgrepError::Index(format!(
            "checksum mismatch (expected {}, got {})",
            hex::encode(expected),
            hex::encode(actual)
        )));
    }

    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn entry(file: &str, index: usize, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            session_id: "abc".to_string(),
            index,
            role: Role::User,
            timestamp: "2025-01-01T00:00:00".to_string(),
            preview: format!("message {}", index),
            file_path: PathBuf::from(file),
            vector,
        }
    }

    fn sample_index() -> Index {
        let mut index = Index::new("-home-me-proj");
        index.add_entry(entry("/p/a.jsonl", 0, vec![1.0, 0.0]));
        index.add_entry(entry("/p/a.jsonl", 1, vec![0.0, 1.0]));
        index.add_entry(entry("/p/b.jsonl", 0, vec![0.5, 0.5]));
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        index.record_file(Path::new("/p/a.jsonl"), t);
        index.record_file(Path::new("/p/b.jsonl"), t);
        index
    }

    #[test]
    fn test_entry_from_message_truncates_preview() {
        let message = Message {
            role: Role::Assistant,
            text: "é".repeat(300),
            timestamp: "2025-01-01T10:00:00".to_string(),
            session_id: "sess".to_string(),
            project: "proj".to_string(),
            file_path: PathBuf::from("/p/sess.jsonl"),
            index: 4,
        };
        let entry = IndexEntry::from_message(&message, 200, vec![0.1]);
        assert_eq!(entry.preview.chars().count(), 200);
        assert_eq!(entry.index, 4);
        assert_eq!(entry.role, Role::Assistant);
    }

    #[test]
    fn test_remove_file() {
        let mut index = sample_index();
        assert_eq!(index.remove_file(Path::new("/p/a.jsonl")), 2);
        assert_eq!(index.entry_count(), 1);
        assert_eq!(index.file_count(), 1);
        assert!(index.file_metadata(Path::new("/p/a.jsonl")).is_none());
        assert_eq!(index.remove_file(Path::new("/p/missing.jsonl")), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = VectorStore::at(dir.path());
        let index = sample_index();

        store.save(&index).unwrap();
        assert!(dir.path().join("-home-me-proj.idx").exists());
        assert!(!dir.path().join("-home-me-proj.idx.tmp").exists());

        let loaded = store.load("-home-me-proj");
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let index = VectorStore::at(dir.path()).load("nothing");
        assert_eq!(index.project, "nothing");
        assert_eq!(index.entry_count(), 0);
    }

    #[test]
    fn test_corrupt_index_starts_fresh() {
        let dir = tempdir().unwrap();
        let store = VectorStore::at(dir.path());
        store.save(&sample_index()).unwrap();

        let path = dir.path().join("-home-me-proj.idx");
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        std::fs::write(&path, &data).unwrap();
        assert_eq!(store.load("-home-me-proj").entry_count(), 0);

        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(store.load("-home-me-proj").entry_count(), 0);
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let mut data = encode(&sample_index()).unwrap();
        data[4] = 99;
        assert!(matches!(decode(&data), Err(SgrepError::Index(_))));
    }

    #[test]
    fn test_projects_and_stats() {
        let dir = tempdir().unwrap();
        let store = VectorStore::at(dir.path());
        assert!(store.projects().unwrap().is_empty());

        store.save(&sample_index()).unwrap();
        let mut other = Index::new("-other");
        other.add_entry(entry("/q/c.jsonl", 0, vec![1.0]));
        other.record_file(Path::new("/q/c.jsonl"), SystemTime::UNIX_EPOCH);
        store.save(&other).unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();

        assert_eq!(store.projects().unwrap(), vec!["-home-me-proj", "-other"]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.projects, 2);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.vectors, 4);
        assert!(stats.size_bytes > 0);
    }

    #[test]
    fn test_missing_index_dir_has_no_projects() {
        let dir = tempdir().unwrap();
        let store = VectorStore::at(&dir.path().join("absent"));
        assert!(store.projects().unwrap().is_empty());
        assert_eq!(store.stats().unwrap(), IndexStats::default());
    }
}
