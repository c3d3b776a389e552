//! Configuration types and constants for sgrep
//!
//! Defines where transcripts and indexes live, how to reach the
//! embedding service, and the tuning knobs shared by both search modes.

use crate::error::{Result, SgrepError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension of session transcript files
pub const SESSION_EXTENSION: &str = "jsonl";

/// Extension of persisted per-project index files
pub const INDEX_EXTENSION: &str = "idx";

/// Upper bound on concurrent file workers, regardless of core count
pub const MAX_WORKERS: usize = 8;

/// Embedding endpoint settings (Ollama-compatible `/api/embed`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service
    pub url: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Configuration for sgrep indexing and search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the transcript store, one subdirectory per project
    pub projects_dir: PathBuf,
    /// Directory holding the per-project vector indexes
    pub index_dir: PathBuf,
    /// Embedding service settings
    pub embedding: EmbeddingConfig,
    /// Number of parallel workers for regex search
    pub workers: usize,
    /// Message text is cut to this many characters before embedding
    pub max_embed_chars: usize,
    /// Length of the text preview stored with each vector
    pub preview_len: usize,
    /// Semantic candidates must score strictly above this
    pub similarity_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        let claude_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".claude");
        Self {
            projects_dir: claude_dir.join("projects"),
            index_dir: claude_dir.join("search-index"),
            embedding: EmbeddingConfig::default(),
            workers: num_cpus::get().clamp(1, MAX_WORKERS),
            max_embed_chars: 2048,
            preview_len: 200,
            similarity_threshold: 0.3,
        }
    }
}

impl Config {
    /// Create a config for explicit transcript and index locations
    pub fn new(projects_dir: PathBuf, index_dir: PathBuf) -> Self {
        Self {
            projects_dir,
            index_dir,
            ..Default::default()
        }
    }

    /// Set the embedding service settings
    pub fn with_embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = embedding;
        self
    }

    /// Set the worker ceiling (at least one worker is always used)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Get path to the advisory lock serializing indexing passes
    pub fn lock_path(&self) -> PathBuf {
        self.index_dir.join("index.lock")
    }

    /// Get path to the config file
    pub fn config_path(&self) -> PathBuf {
        self.index_dir.join("config.json")
    }

    /// Directory holding the sessions of one project
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects_dir.join(project)
    }

    /// Directory holding the sessions recorded from `cwd`
    pub fn project_dir_for(&self, cwd: &Path) -> PathBuf {
        self.projects_dir.join(encode_project_path(cwd))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.index_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(self.config_path(), json)?;
        Ok(())
    }

    /// Load `config.json` from `index_dir`, or defaults if there is none
    pub fn load_or_default(index_dir: &Path) -> Result<Self> {
        let config_path = index_dir.join("config.json");
        if !config_path.exists() {
            return Ok(Self {
                index_dir: index_dir.to_path_buf(),
                ..Default::default()
            });
        }
        let json = std::fs::read_to_string(&config_path)?;
        let mut config: Config = serde_json::from_str(&json).map_err(|e| {
            SgrepError::Config(format!("{}: {}", config_path.display(), e))
        })?;
        // The file always describes the directory it was found in
        config.index_dir = index_dir.to_path_buf();
        Ok(config)
    }
}

/// Check if a file is a session transcript based on its extension
pub fn is_session_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == SESSION_EXTENSION)
        .unwrap_or(false)
}

/// Encode a working directory the way the transcript store names projects
///
/// `/home/me/src/app` becomes `-home-me-src-app`.
pub fn encode_project_path(path: &Path) -> String {
    let path = path.to_string_lossy();
    let trimmed = path.strip_prefix('/').unwrap_or(&path);
    format!("-{}", trimmed.replace('/', "-"))
}
