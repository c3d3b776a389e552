//! Regex search over session transcripts
//!
//! Candidate files are filtered by age and by the literal prefilter,
//! then parsed and matched on a bounded rayon pool. Per-file results are
//! joined in file order and ranked newest first.

use crate::config::Config;
use crate::error::{Result, SgrepError};
use crate::filter::SearchOptions;
use crate::prefilter::Prefilter;
use crate::transcript::{discover_session_files, parse_transcript, Match};
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Counters describing one regex search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Session files inside the age window
    pub files_total: usize,
    /// Files rejected by the prefilter without parsing
    pub prefilter_skipped: usize,
    /// Files parsed and matched
    pub regex_searched: usize,
}

/// Ranked matches plus search counters
#[derive(Debug, Clone, Default)]
pub struct GrepOutput {
    pub matches: Vec<Match>,
    pub stats: SearchStats,
}

/// Concurrent regex searcher
pub struct RegexSearcher {
    workers: usize,
}

impl RegexSearcher {
    /// Create a searcher using the configured worker ceiling
    pub fn new(config: &Config) -> Self {
        Self {
            workers: config.workers.max(1),
        }
    }

    /// Search every session file under `root` for `pattern`
    ///
    /// Matching is case-insensitive. An invalid pattern or a missing
    /// root fails before any file is opened.
    pub fn search(&self, pattern: &str, root: &Path, options: &SearchOptions) -> Result<GrepOutput> {
        let re = compile(pattern)?;

        let files = discover_session_files(root, options.modified_since())?;

        let prefilter = Prefilter::from_pattern(pattern);
        if prefilter.is_enabled() {
            debug!("Prefilter literals: {:?}", prefilter.literals());
        } else {
            debug!("Prefilter disabled for {:?}", pattern);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| SgrepError::Config(format!("cannot start worker pool: {}", e)))?;

        let skipped = AtomicUsize::new(0);
        let per_file: Vec<Vec<Match>> = pool.install(|| {
            files
                .par_iter()
                .map(|path| search_file(path, &re, &prefilter, options, &skipped))
                .collect()
        });

        let mut matches: Vec<Match> = per_file.into_iter().flatten().collect();
        matches.sort_by(|a, b| b.message.timestamp.cmp(&a.message.timestamp));
        if options.max_results > 0 {
            matches.truncate(options.max_results);
        }

        let prefilter_skipped = skipped.into_inner();
        let stats = SearchStats {
            files_total: files.len(),
            prefilter_skipped,
            regex_searched: files.len() - prefilter_skipped,
        };

        info!(
            "{} matches ({} files, {} skipped by prefilter)",
            matches.len(),
            stats.files_total,
            stats.prefilter_skipped
        );

        Ok(GrepOutput { matches, stats })
    }
}

/// Compile `pattern` case-insensitively
pub fn compile(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

fn search_file(
    path: &Path,
    re: &Regex,
    prefilter: &Prefilter,
    options: &SearchOptions,
    skipped: &AtomicUsize,
) -> Vec<Match> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    if !prefilter.matches(&data) {
        skipped.fetch_add(1, Ordering::Relaxed);
        return Vec::new();
    }

    let messages = parse_transcript(path, &data);
    messages
        .iter()
        .filter(|message| options.role.allows(message.role) && re.is_match(&message.text))
        .map(|message| Match::around(&messages, message.index, options.before, options.after))
        .collect()
}

/// Rewrite basic-regex escapes (`\|`, `\(`, `\)`, `\+`, `\?`) to their
/// extended meaning
///
/// Other escapes, including `\\`, pass through untouched.
pub fn normalize_bre(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next @ ('|' | '(' | ')' | '+' | '?')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }

    out
}
