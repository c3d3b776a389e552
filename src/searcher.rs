//! Semantic search over the stored message embeddings
//!
//! Scores every in-scope entry against the query vector, keeps the ones
//! above the similarity threshold, and rehydrates the survivors from
//! their session files.

use crate::config::Config;
use crate::embedder::{cosine_similarity, EmbeddingProvider};
use crate::error::{Result, SgrepError};
use crate::filter::{is_within_cutoff, SearchOptions};
use crate::index::{IndexEntry, IndexStats, VectorStore};
use crate::transcript::{context_window, project_from_path, read_transcript, Match, Message};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Semantic searcher
pub struct Searcher {
    config: Config,
    store: VectorStore,
    embedder: Box<dyn EmbeddingProvider>,
}

impl Searcher {
    /// Create a searcher embedding queries through `embedder`
    pub fn new(config: Config, embedder: Box<dyn EmbeddingProvider>) -> Self {
        let store = VectorStore::new(&config);
        Self {
            config,
            store,
            embedder,
        }
    }

    /// Find the messages under `root` closest in meaning to `query`
    ///
    /// `root` is either the projects root (every project) or a project
    /// directory beneath it.
    pub fn search(&self, query: &str, root: &Path, options: &SearchOptions) -> Result<Vec<Match>> {
        let projects = self.store.projects()?;
        if projects.is_empty() {
            return Err(SgrepError::NoIndex);
        }

        let query_vector = self.embedder.embed(query)?;
        let cutoff = options.cutoff();
        let threshold = self.config.similarity_threshold;

        let mut candidates: Vec<(IndexEntry, f32)> = Vec::new();
        for project in &projects {
            if !self.config.project_dir(project).starts_with(root) {
                continue;
            }

            let index = self.store.load(project);
            debug!("Scoring {} vectors of {}", index.entry_count(), project);

            for entry in index.entries {
                if !options.role.allows(entry.role) || !is_within_cutoff(&entry.timestamp, cutoff) {
                    continue;
                }
                let similarity = cosine_similarity(&query_vector, &entry.vector);
                if passes_threshold(similarity, threshold) {
                    candidates.push((entry, similarity));
                }
            }
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(options.semantic_limit());

        info!("{} semantic matches for {:?}", candidates.len(), query);

        let mut sessions: HashMap<PathBuf, Vec<Message>> = HashMap::new();
        let matches = candidates
            .into_iter()
            .map(|(entry, similarity)| {
                let messages = sessions
                    .entry(entry.file_path.clone())
                    .or_insert_with(|| read_transcript(&entry.file_path));
                rehydrate(entry, similarity, messages, options)
            })
            .collect();

        Ok(matches)
    }

    /// Aggregate statistics of the stored indexes
    pub fn stats(&self) -> Result<IndexStats> {
        self.store.stats()
    }
}

/// Similarity must strictly exceed the threshold
pub fn passes_threshold(similarity: f32, threshold: f32) -> bool {
    similarity > threshold
}

/// Recover the full message and its context from the parsed session,
/// falling back to the stored preview
fn rehydrate(
    entry: IndexEntry,
    similarity: f32,
    messages: &[Message],
    options: &SearchOptions,
) -> Match {
    if entry.index < messages.len() {
        let mut found = Match::around(messages, entry.index, options.before, options.after);
        found.similarity = Some(similarity);
        return found;
    }

    let (context_before, context_after) =
        context_window(messages, entry.index, options.before, options.after);
    Match {
        message: Message {
            role: entry.role,
            text: entry.preview,
            timestamp: entry.timestamp,
            session_id: entry.session_id,
            project: project_from_path(&entry.file_path),
            file_path: entry.file_path,
            index: entry.index,
        },
        context_before,
        context_after,
        similarity: Some(similarity),
    }
}
