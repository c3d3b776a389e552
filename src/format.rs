//! Result rendering for the terminal and JSON
//!
//! Terminal output groups matches by session in first-appearance order
//! and prints each message at most once per group.

use crate::error::Result;
use crate::filter::SearchOptions;
use crate::index::IndexStats;
use crate::transcript::{Match, Message, Role};
use colored::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

/// Display limit for matched messages, in characters
const MATCH_DISPLAY_LEN: usize = 500;

/// Display limit for context messages, in characters
const CONTEXT_DISPLAY_LEN: usize = 200;

/// Bytes kept before the first regex hit when windowing long matches
const WINDOW_BEFORE: usize = 150;

/// Bytes kept after the first regex hit when windowing long matches
const WINDOW_AFTER: usize = 350;

struct SessionGroup<'a> {
    project: &'a str,
    session_id: &'a str,
    matches: Vec<&'a Match>,
}

fn group_by_session(matches: &[Match]) -> Vec<SessionGroup<'_>> {
    let mut groups: Vec<SessionGroup<'_>> = Vec::new();

    for m in matches {
        let existing = groups.iter_mut().find(|g| {
            g.project == m.message.project && g.session_id == m.message.session_id
        });
        match existing {
            Some(group) => group.matches.push(m),
            None => groups.push(SessionGroup {
                project: &m.message.project,
                session_id: &m.message.session_id,
                matches: vec![m],
            }),
        }
    }

    groups
}

/// Format matches for terminal display
///
/// `highlight` marks regex hits inside matched messages; semantic
/// results pass `None`.
pub fn format_terminal(matches: &[Match], options: &SearchOptions, highlight: Option<&Regex>) -> String {
    let groups = group_by_session(matches);
    let mut output = String::new();

    if options.list_only {
        for group in &groups {
            for m in &group.matches {
                output.push_str(&format!("{}  {}\n", m.message.session_id, m.message.timestamp));
            }
        }
        return output;
    }

    let show_separators = options.before > 0 || options.after > 0;

    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        output.push_str(&format!(
            "{}\n",
            format!("--- {}/{} ---", group.project, group.session_id).bold()
        ));

        let mut printed: HashSet<usize> = HashSet::new();
        for (mi, m) in group.matches.iter().enumerate() {
            for ctx in &m.context_before {
                if printed.insert(ctx.index) {
                    output.push_str(&format_message(ctx, false, None, highlight));
                }
            }

            if printed.insert(m.message.index) {
                output.push_str(&format_message(&m.message, true, m.similarity, highlight));
            }

            for ctx in &m.context_after {
                if printed.insert(ctx.index) {
                    output.push_str(&format_message(ctx, false, None, highlight));
                }
            }

            if show_separators && mi + 1 < group.matches.len() {
                output.push_str("  --\n");
            }
        }
    }

    output
}

fn format_message(
    message: &Message,
    is_match: bool,
    similarity: Option<f32>,
    highlight: Option<&Regex>,
) -> String {
    let tag = match message.role {
        Role::User => "YOU".blue(),
        Role::Assistant => "AI ".green(),
    };

    let highlight = highlight.filter(|_| is_match);
    let max_len = if is_match {
        MATCH_DISPLAY_LEN
    } else {
        CONTEXT_DISPLAY_LEN
    };

    let mut text = display_window(&message.text, max_len, highlight);
    if let Some(re) = highlight {
        text = re
            .replace_all(&text, |caps: &regex::Captures| caps[0].yellow().bold().to_string())
            .into_owned();
    }
    let text = text.replace('\n', " ");

    let marker = if is_match { ">" } else { " " };
    let text = if is_match {
        text
    } else {
        text.dimmed().to_string()
    };
    let score = match similarity {
        Some(sim) if is_match && sim > 0.0 => format!(" {}", format!("[{:.2}]", sim).cyan()),
        _ => String::new(),
    };

    format!("  {} {} [{}]{} {}\n", marker, message.timestamp, tag, score, text)
}

/// Cut long text for display, centred on the first regex hit if any
fn display_window(text: &str, max_len: usize, highlight: Option<&Regex>) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    if let Some(hit) = highlight.and_then(|re| re.find(text)) {
        let start = floor_boundary(text, hit.start().saturating_sub(WINDOW_BEFORE));
        let end = ceil_boundary(text, hit.end().saturating_add(WINDOW_AFTER));
        let prefix = if start > 0 { "..." } else { "" };
        let suffix = if end < text.len() { "..." } else { "" };
        return format!("{}{}{}", prefix, &text[start..end], suffix);
    }

    let cut: String = text.chars().take(max_len).collect();
    format!("{}...", cut)
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[derive(Serialize)]
struct JsonContext<'a> {
    timestamp: &'a str,
    role: Role,
    text: &'a str,
}

impl<'a> From<&'a Message> for JsonContext<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            timestamp: &message.timestamp,
            role: message.role,
            text: &message.text,
        }
    }
}

#[derive(Serialize)]
struct JsonMatch<'a> {
    session: &'a str,
    project: &'a str,
    timestamp: &'a str,
    role: Role,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    context_before: Vec<JsonContext<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    context_after: Vec<JsonContext<'a>>,
}

/// Format matches as a pretty-printed JSON array
pub fn format_json(matches: &[Match]) -> Result<String> {
    let json_matches: Vec<JsonMatch<'_>> = matches
        .iter()
        .map(|m| JsonMatch {
            session: &m.message.session_id,
            project: &m.message.project,
            timestamp: &m.message.timestamp,
            role: m.message.role,
            text: &m.message.text,
            similarity: m.similarity,
            context_before: m.context_before.iter().map(JsonContext::from).collect(),
            context_after: m.context_after.iter().map(JsonContext::from).collect(),
        })
        .collect();

    Ok(serde_json::to_string_pretty(&json_matches)?)
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1 << 10;
    const MB: u64 = 1 << 20;
    const GB: u64 = 1 << 30;

    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

/// Index status report
pub fn format_stats(stats: &IndexStats) -> String {
    format!(
        "{}\n  Projects: {}\n  Files:    {}\n  Vectors:  {}\n  Size:     {}\n",
        "Index status".bold(),
        stats.projects,
        stats.files,
        stats.vectors,
        format_size(stats.size_bytes)
    )
}

/// Explain an empty result and suggest how to widen the search
pub fn format_no_match_hint(
    pattern: &str,
    files_in_scope: usize,
    options: &SearchOptions,
    all_projects: bool,
    semantic: bool,
) -> String {
    let scope = if all_projects {
        "all projects"
    } else {
        "current project"
    };
    let mut output = format!(
        "no matches for {:?} ({} files, {} days, {})\n",
        pattern, files_in_scope, options.max_days, scope
    );

    let mut hints = Vec::new();
    if options.max_days <= 7 {
        hints.push("-d 30 (broader time range)");
    }
    if !all_projects {
        hints.push("-a (all projects)");
    }
    if !semantic {
        hints.push("-s (semantic search by meaning)");
    }
    if !hints.is_empty() {
        output.push_str(&format!("try: {}\n", hints.join(", ")));
    }

    output
}
