//! # sgrep - Search chat-session transcripts
//!
//! Searches the local archive of chat sessions (one line-delimited JSON
//! file per session, one directory per project) by regular expression or
//! by meaning.
//!
//! ## Features
//!
//! - **Regex Search**: Case-insensitive, parallel, with a literal
//!   prefilter that skips files before parsing them
//! - **Semantic Search**: Cosine similarity against a per-project index
//!   of message embeddings
//! - **Incremental Indexing**: Only session files whose modification
//!   time changed are re-embedded
//! - **Context**: Neighbouring messages from the same session around
//!   every match
//!
//! ## Example
//!
//! ```no_run
//! use sgrep::{Config, Indexer, OllamaEmbedder, RegexSearcher, SearchOptions, Searcher};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let options = SearchOptions::new().with_max_days(30).with_context(1, 1);
//!
//!     // Regex search
//!     let output = RegexSearcher::new(&config).search("deploy|rollback", &config.projects_dir, &options)?;
//!     for m in &output.matches {
//!         println!("{} {}: {}", m.message.timestamp, m.message.role, m.message.text);
//!     }
//!
//!     // Build the index, then search by meaning
//!     let embedder = OllamaEmbedder::new(&config.embedding)?;
//!     embedder.ensure_reachable()?;
//!     Indexer::new(config.clone(), Box::new(embedder)).run(false)?;
//!
//!     let searcher = Searcher::new(config.clone(), Box::new(OllamaEmbedder::new(&config.embedding)?));
//!     for m in searcher.search("why did the release fail", &config.projects_dir, &options)? {
//!         println!("[{:.2}] {}", m.similarity.unwrap_or_default(), m.message.text);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embedder;
pub mod error;
pub mod filter;
pub mod format;
pub mod grep;
pub mod index;
pub mod indexer;
pub mod lock;
pub mod prefilter;
pub mod searcher;
pub mod transcript;

// Re-export commonly used types
pub use config::{encode_project_path, Config, EmbeddingConfig};
pub use embedder::{cosine_similarity, EmbeddingProvider, OllamaEmbedder};
pub use error::{Result, SgrepError};
pub use filter::{RoleFilter, SearchOptions};
pub use format::{format_json, format_no_match_hint, format_size, format_stats, format_terminal};
pub use grep::{normalize_bre, GrepOutput, RegexSearcher, SearchStats};
pub use index::{FileMetadata, Index, IndexEntry, IndexStats, VectorStore};
pub use indexer::{Indexer, UpdateStats};
pub use lock::IndexLock;
pub use prefilter::Prefilter;
pub use searcher::Searcher;
pub use transcript::{parse_transcript, read_transcript, Match, Message, Role};
