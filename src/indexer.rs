//! Incremental indexing of session transcripts
//!
//! Walks each project directory, re-embeds the messages of session
//! files whose modification time changed since the last pass, and
//! persists the project index.

use crate::config::Config;
use crate::embedder::EmbeddingProvider;
use crate::error::{Result, SgrepError};
use crate::index::{Index, IndexEntry, VectorStore};
use crate::lock::IndexLock;
use crate::transcript::{discover_session_files, parse_transcript, truncate_chars};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long an indexing pass waits for a concurrent one to finish
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds and refreshes project indexes
pub struct Indexer {
    config: Config,
    store: VectorStore,
    embedder: Box<dyn EmbeddingProvider>,
    show_progress: bool,
}

impl Indexer {
    /// Create an indexer embedding through `embedder`
    pub fn new(config: Config, embedder: Box<dyn EmbeddingProvider>) -> Self {
        let store = VectorStore::new(&config);
        Self {
            config,
            store,
            embedder,
            show_progress: false,
        }
    }

    /// Show progress bars on stderr
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Index every project under the projects root
    ///
    /// With `force`, previously stored indexes are discarded first.
    pub fn run(&self, force: bool) -> Result<UpdateStats> {
        let _lock = IndexLock::acquire(&self.config.lock_path(), LOCK_TIMEOUT)?;

        let projects = self.discover_projects()?;
        info!(
            "Indexing {} projects with {}",
            projects.len(),
            self.embedder.model_name()
        );

        let mut total = UpdateStats::default();
        for project in &projects {
            total += self.index_project_unlocked(project, force)?;
        }

        info!("Index pass complete: {}", total);
        Ok(total)
    }

    /// Index a single project
    pub fn index_project(&self, project: &str, force: bool) -> Result<UpdateStats> {
        let _lock = IndexLock::acquire(&self.config.lock_path(), LOCK_TIMEOUT)?;
        self.index_project_unlocked(project, force)
    }

    fn index_project_unlocked(&self, project: &str, force: bool) -> Result<UpdateStats> {
        let project_dir = self.config.project_dir(project);

        let mut index = if force {
            info!("Rebuilding index for {}", project);
            Index::new(project)
        } else {
            self.store.load(project)
        };

        let stats = self.update_index(&mut index, &project_dir)?;
        self.store.save(&index)?;

        info!("{}: {}", project, stats);
        Ok(stats)
    }

    /// Bring `index` up to date with the session files in `project_dir`
    pub fn update_index(&self, index: &mut Index, project_dir: &Path) -> Result<UpdateStats> {
        let files = discover_session_files(project_dir, None)?;
        let mut stats = UpdateStats::default();

        // Evict files that disappeared
        let present: HashSet<&PathBuf> = files.iter().collect();
        for path in index.indexed_files() {
            if !present.contains(&path) {
                index.remove_file(&path);
                stats.removed += 1;
            }
        }

        let pb = self.progress_bar(files.len() as u64, &index.project);

        for path in &files {
            pb.inc(1);

            let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };

            let unchanged = index
                .file_metadata(path)
                .map(|meta| meta.last_modified == modified)
                .unwrap_or(false);
            if unchanged {
                debug!("Skipping unchanged file: {}", path.display());
                stats.skipped += 1;
                continue;
            }

            index.remove_file(path);

            let data = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    continue;
                }
            };

            let messages = parse_transcript(path, &data);
            debug!("Embedding {} messages from {}", messages.len(), path.display());

            for message in &messages {
                let text = truncate_chars(&message.text, self.config.max_embed_chars);
                match self.embedder.embed(text) {
                    Ok(vector) => {
                        index.add_entry(IndexEntry::from_message(
                            message,
                            self.config.preview_len,
                            vector,
                        ));
                        stats.embedded += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Embedding failed for {} message {}: {}",
                            path.display(),
                            message.index,
                            e
                        );
                        stats.failed += 1;
                    }
                }
            }

            index.record_file(path, modified);
            stats.indexed += 1;
        }

        pb.finish_and_clear();
        Ok(stats)
    }

    /// Project directory names under the projects root, sorted
    fn discover_projects(&self) -> Result<Vec<String>> {
        let root = &self.config.projects_dir;
        if !root.is_dir() {
            return Err(SgrepError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut projects: Vec<String> = std::fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();

        projects.sort();
        Ok(projects)
    }

    fn progress_bar(&self, len: u64, project: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(project.to_string());
        pb
    }
}

/// Statistics for index updates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    /// Files (re)embedded this pass
    pub indexed: usize,
    /// Files whose modification time was unchanged
    pub skipped: usize,
    /// Files that no longer exist
    pub removed: usize,
    /// Messages embedded
    pub embedded: usize,
    /// Messages whose embedding failed
    pub failed: usize,
}

impl std::ops::AddAssign for UpdateStats {
    fn add_assign(&mut self, other: Self) {
        self.indexed += other.indexed;
        self.skipped += other.skipped;
        self.removed += other.removed;
        self.embedded += other.embedded;
        self.failed += other.failed;
    }
}

impl std::fmt::Display for UpdateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Indexed: {}, Skipped: {}, Removed: {}, Embedded: {}, Failed: {}",
            self.indexed, self.skipped, self.removed, self.embedded, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::{tempdir, TempDir};

    /// Deterministic embedder that counts its calls
    struct CountingEmbedder {
        calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("FAIL") {
                return Err(SgrepError::Embedding("refused".to_string()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: Config,
        calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let config = Config::new(dir.path().join("projects"), dir.path().join("index"));
            std::fs::create_dir_all(config.project_dir("-proj")).unwrap();
            Self {
                _dir: dir,
                config,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn indexer(&self) -> Indexer {
            Indexer::new(
                self.config.clone(),
                Box::new(CountingEmbedder {
                    calls: Arc::clone(&self.calls),
                }),
            )
        }

        fn write_session(&self, name: &str, texts: &[&str]) -> PathBuf {
            let lines: Vec<String> = texts
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    let role = if i % 2 == 0 { "user" } else { "assistant" };
                    serde_json::json!({
                        "type": role,
                        "timestamp": format!("2025-03-01T10:00:{:02}Z", i),
                        "message": {"content": text},
                    })
                    .to_string()
                })
                .collect();
            let path = self.config.project_dir("-proj").join(name);
            std::fs::write(&path, lines.join("\n")).unwrap();
            path
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_incremental_pass_skips_unchanged() {
        let fx = Fixture::new();
        let path = fx.write_session("s1.jsonl", &["how do I rotate logs", "use logrotate"]);
        let indexer = fx.indexer();

        let first = indexer.index_project("-proj", false).unwrap();
        assert_eq!(first.indexed, 1);
        assert_eq!(first.embedded, 2);
        assert_eq!(fx.calls(), 2);

        let index = VectorStore::new(&fx.config).load("-proj");
        assert_eq!(index.entry_count(), 2);
        let recorded = index.file_metadata(&path).unwrap().last_modified;
        assert_eq!(recorded, std::fs::metadata(&path).unwrap().modified().unwrap());

        let second = indexer.index_project("-proj", false).unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.indexed, 0);
        assert_eq!(fx.calls(), 2);
    }

    #[test]
    fn test_touched_file_is_reembedded() {
        let fx = Fixture::new();
        let path = fx.write_session("s1.jsonl", &["alpha", "beta"]);
        let indexer = fx.indexer();
        indexer.index_project("-proj", false).unwrap();

        let later = std::fs::metadata(&path).unwrap().modified().unwrap() + Duration::from_secs(60);
        set_mtime(&path, later);

        let stats = indexer.index_project("-proj", false).unwrap();
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(fx.calls(), 4);

        // Old rows were evicted, not duplicated
        let index = VectorStore::new(&fx.config).load("-proj");
        assert_eq!(index.entry_count(), 2);
        assert_eq!(index.file_metadata(&path).unwrap().last_modified, later);
    }

    #[test]
    fn test_force_rebuilds() {
        let fx = Fixture::new();
        fx.write_session("s1.jsonl", &["alpha"]);
        let indexer = fx.indexer();
        indexer.index_project("-proj", false).unwrap();

        let stats = indexer.index_project("-proj", true).unwrap();
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(VectorStore::new(&fx.config).load("-proj").entry_count(), 1);
    }

    #[test]
    fn test_deleted_file_is_removed() {
        let fx = Fixture::new();
        fx.write_session("keep.jsonl", &["alpha"]);
        let gone = fx.write_session("gone.jsonl", &["beta", "gamma"]);
        let indexer = fx.indexer();
        indexer.index_project("-proj", false).unwrap();

        std::fs::remove_file(&gone).unwrap();
        let stats = indexer.index_project("-proj", false).unwrap();
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.skipped, 1);

        let index = VectorStore::new(&fx.config).load("-proj");
        assert_eq!(index.entry_count(), 1);
        assert!(index.file_metadata(&gone).is_none());
    }

    #[test]
    fn test_failed_embedding_skips_message() {
        let fx = Fixture::new();
        let path = fx.write_session("s1.jsonl", &["fine", "please FAIL", "also fine"]);
        let stats = fx.indexer().index_project("-proj", false).unwrap();

        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.indexed, 1);

        let index = VectorStore::new(&fx.config).load("-proj");
        let indices: Vec<usize> = index.entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(index.file_metadata(&path).is_some());
    }

    #[test]
    fn test_long_text_is_truncated_before_embedding() {
        let fx = Fixture::new();
        let long = "x".repeat(5000);
        fx.write_session("s1.jsonl", &[&long]);
        fx.indexer().index_project("-proj", false).unwrap();

        let index = VectorStore::new(&fx.config).load("-proj");
        assert_eq!(index.entries[0].vector[0], 2048.0);
        assert_eq!(index.entries[0].preview.len(), 200);
    }

    #[test]
    fn test_run_covers_all_projects() {
        let fx = Fixture::new();
        fx.write_session("s1.jsonl", &["alpha"]);
        let other = fx.config.project_dir("-other");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(
            other.join("s2.jsonl"),
            r#"{"type":"user","message":{"content":"beta"}}"#,
        )
        .unwrap();

        let stats = fx.indexer().run(false).unwrap();
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.embedded, 2);
        assert_eq!(
            VectorStore::new(&fx.config).projects().unwrap(),
            vec!["-other", "-proj"]
        );
    }

    #[test]
    fn test_missing_projects_root() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("nope"), dir.path().join("index"));
        let indexer = Indexer::new(
            config,
            Box::new(CountingEmbedder {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        );
        assert!(matches!(indexer.run(false), Err(SgrepError::InvalidPath(_))));
    }

    #[test]
    fn test_stats_display_and_sum() {
        let mut total = UpdateStats {
            indexed: 1,
            skipped: 2,
            ..Default::default()
        };
        total += UpdateStats {
            indexed: 3,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(
            total.to_string(),
            "Indexed: 4, Skipped: 2, Removed: 0, Embedded: 0, Failed: 1"
        );
    }
}
