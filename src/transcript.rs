//! Transcript parsing for session files
//!
//! Turns the line-delimited JSON records of one session file into an
//! ordered, deduplicated sequence of chat messages. Record shapes vary
//! between producer versions, so every line goes through a small decode
//! step with an explicit fallback order and malformed lines are skipped.

use crate::config::is_session_file;
use crate::error::{Result, SgrepError};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Timestamps are cut to `YYYY-MM-DDTHH:MM:SS`
const TIMESTAMP_LEN: usize = 19;

/// Session ids are the first characters of the file stem
const SESSION_ID_LEN: usize = 12;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn from_record_type(kind: &str) -> Option<Self> {
        match kind {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat turn recovered from a session file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn
    pub role: Role,
    /// Trimmed, non-empty text
    pub text: String,
    /// Second-precision timestamp, empty when the record had none
    pub timestamp: String,
    /// First characters of the session file stem
    pub session_id: String,
    /// Name of the directory holding the session file
    pub project: String,
    /// Session file the message came from
    pub file_path: PathBuf,
    /// Position within the session (0-based, dense)
    pub index: usize,
}

/// A message that satisfied a search, with its neighbours
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// The matching message
    pub message: Message,
    /// Up to N messages immediately before it in the same session
    pub context_before: Vec<Message>,
    /// Up to M messages immediately after it in the same session
    pub context_after: Vec<Message>,
    /// Cosine similarity, only set by semantic search
    pub similarity: Option<f32>,
}

impl Match {
    /// Build a match for `messages[index]` with clamped context windows
    pub fn around(messages: &[Message], index: usize, before: usize, after: usize) -> Self {
        let (context_before, context_after) = context_window(messages, index, before, after);
        Self {
            message: messages[index].clone(),
            context_before,
            context_after,
            similarity: None,
        }
    }
}

/// Messages surrounding position `index`, clamped to the session bounds
///
/// An `index` past the end yields whatever part of the before-window
/// still exists and an empty after-window.
pub fn context_window(
    messages: &[Message],
    index: usize,
    before: usize,
    after: usize,
) -> (Vec<Message>, Vec<Message>) {
    let len = messages.len();
    let end_before = index.min(len);
    let start_before = index.saturating_sub(before).min(end_before);
    let start_after = index.saturating_add(1).min(len);
    let end_after = index.saturating_add(1).saturating_add(after).min(len);

    (
        messages[start_before..end_before].to_vec(),
        messages[start_after..end_after].to_vec(),
    )
}

/// One line of a session file, before normalization
#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type", default)]
    kind: Value,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
}

/// The `message` object of a record
#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    content: Option<Content>,
}

/// Message content is either plain text or a list of typed blocks
#[derive(Deserialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Blocks(Vec<Block>),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type", default)]
    kind: Value,
    #[serde(default)]
    text: Value,
}

impl Content {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::Blocks(blocks) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter(|block| block.kind.as_str() == Some("text"))
                    .filter_map(|block| block.text.as_str())
                    .filter(|text| !text.is_empty())
                    .collect();
                texts.join(" ").trim().to_string()
            }
            Self::Other(_) => String::new(),
        }
    }
}

impl RawRecord {
    fn role(&self) -> Option<Role> {
        self.kind.as_str().and_then(Role::from_record_type)
    }

    fn timestamp(&self) -> String {
        self.timestamp
            .as_str()
            .map(|ts| ts.chars().take(TIMESTAMP_LEN).collect())
            .unwrap_or_default()
    }

    /// `message.content` first; `data.message.content` only when
    /// `message` is present but not an object
    fn text(&self) -> String {
        let payload = match &self.message {
            Some(message) if message.is_object() => Payload::deserialize(message).ok(),
            Some(_) => self
                .data
                .as_ref()
                .and_then(|data| data.get("message"))
                .filter(|message| message.is_object())
                .and_then(|message| Payload::deserialize(message).ok()),
            None => None,
        };

        payload
            .and_then(|payload| payload.content)
            .map(Content::into_text)
            .unwrap_or_default()
    }
}

/// Parse the raw bytes of a session file into messages
///
/// Consecutive records with the same timestamp and role collapse into
/// the later one. Indices are renumbered after deduplication.
pub fn parse_transcript(path: &Path, data: &[u8]) -> Vec<Message> {
    let session_id = session_id_from_path(path);
    let project = project_from_path(path);
    let mut messages: Vec<Message> = Vec::new();

    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }

        // Only JSON objects are records; serde would also accept arrays
        let record = match serde_json::from_slice::<Value>(line) {
            Ok(value) if value.is_object() => match RawRecord::deserialize(value) {
                Ok(record) => record,
                Err(_) => continue,
            },
            _ => continue,
        };

        let Some(role) = record.role() else {
            continue;
        };

        let text = record.text();
        if text.is_empty() {
            continue;
        }

        let message = Message {
            role,
            text,
            timestamp: record.timestamp(),
            session_id: session_id.clone(),
            project: project.clone(),
            file_path: path.to_path_buf(),
            index: messages.len(),
        };

        if let Some(prev) = messages.last_mut() {
            if prev.timestamp == message.timestamp && prev.role == message.role {
                *prev = message;
                continue;
            }
        }

        messages.push(message);
    }

    for (i, message) in messages.iter_mut().enumerate() {
        message.index = i;
    }

    messages
}

/// Read and parse a session file; unreadable files have no messages
pub fn read_transcript(path: &Path) -> Vec<Message> {
    match std::fs::read(path) {
        Ok(data) => parse_transcript(path, &data),
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Session id: file stem cut to 12 characters
pub fn session_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().chars().take(SESSION_ID_LEN).collect())
        .unwrap_or_default()
}

/// Project id: name of the parent directory
pub fn project_from_path(path: &Path) -> String {
    path.parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Cut `text` to at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Find session files under `root`, optionally only those modified at
/// or after `modified_since`
///
/// Entries that cannot be read are skipped; only a missing or
/// non-directory root is an error. Paths come back sorted by name.
pub fn discover_session_files(
    root: &Path,
    modified_since: Option<SystemTime>,
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(SgrepError::InvalidPath(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_session_file(entry.path()))
        .filter(|entry| match modified_since {
            Some(cutoff) => entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(|modified| modified >= cutoff)
                .unwrap_or(false),
            None => true,
        })
        .map(|entry| entry.into_path())
        .collect();

    debug!("Found {} session files under {}", files.len(), root.display());

    Ok(files)
}
