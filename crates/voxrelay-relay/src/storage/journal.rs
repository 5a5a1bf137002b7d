//! Upsert-capable append log.
//!
//! Entries carrying a correlation id are unique per id: a second upsert
//! replaces the content of the first in place. Entries without one are
//! immutable appends. The on-disk form is a plain text file:
//!
//! ```text
//! @@ 2026-01-05T10:00:00.000Z content-delta id=c-1 context=chat/42
//! Hello world
//! @@ 2026-01-05T10:00:03.000Z submit-command id=- context=-
//! book a flight
//! ```
//!
//! Body lines starting with `@@` or `\` are escaped with a leading `\`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::JournalError;

const HEADER_PREFIX: &str = "@@";
const ESCAPE: char = '\\';
const NONE_MARKER: &str = "-";

/// One durable journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub correlation_id: Option<String>,
    pub context: Option<String>,
    pub content: String,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Appended,
    Replaced,
}

/// Journal contents plus the file backing them, if any.
#[derive(Debug, Default)]
pub struct Journal {
    path: Option<PathBuf>,
    entries: Vec<JournalEntry>,
    /// correlation id -> position in `entries`
    index: HashMap<String, usize>,
}

impl Journal {
    /// A journal that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a file-backed journal, loading existing entries.
    pub async fn open(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let entries = match tokio::fs::read_to_string(path).await {
            Ok(text) => parse_journal(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut journal = Self {
            path: Some(path.to_path_buf()),
            entries: Vec::new(),
            index: HashMap::new(),
        };
        for entry in entries {
            journal.insert(entry);
        }
        info!(path = %path.display(), entries = journal.entries.len(), "Journal opened");
        Ok(journal)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn get(&self, correlation_id: &str) -> Option<&JournalEntry> {
        self.index.get(correlation_id).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace by correlation id, then persist.
    ///
    /// A replacement only overwrites `content`; timestamp, kind, context and
    /// position of the original entry are kept.
    pub async fn upsert(&mut self, entry: JournalEntry) -> Result<Upserted, JournalError> {
        let existing = entry
            .correlation_id
            .as_deref()
            .and_then(|id| self.index.get(id).copied());

        match existing {
            Some(position) => {
                self.entries[position].content = entry.content;
                self.rewrite().await?;
                Ok(Upserted::Replaced)
            }
            None => {
                let text = format_entry(&entry);
                self.insert(entry);
                self.append(&text).await?;
                Ok(Upserted::Appended)
            }
        }
    }

    fn insert(&mut self, entry: JournalEntry) {
        match entry.correlation_id.clone() {
            Some(id) => {
                if let Some(&position) = self.index.get(&id) {
                    // Duplicate id in a loaded file: last one wins, first position kept.
                    self.entries[position].content = entry.content;
                } else {
                    self.index.insert(id, self.entries.len());
                    self.entries.push(entry);
                }
            }
            None => self.entries.push(entry),
        }
    }

    async fn append(&self, text: &str) -> Result<(), JournalError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rewrite(&self) -> Result<(), JournalError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text: String = self.entries.iter().map(format_entry).collect();
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, text.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), entries = self.entries.len(), "Journal rewritten");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Whether `id` survives a round trip through an entry header.
///
/// Ids are space-delimited in the header and `-` marks an absent id.
pub fn is_header_safe_id(id: &str) -> bool {
    !id.is_empty() && id != NONE_MARKER && !id.contains(char::is_whitespace)
}

/// Header values may not span lines.
fn header_value(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.replace(['\n', '\r'], " "),
        _ => NONE_MARKER.to_string(),
    }
}

/// Serialize one entry: header line plus escaped body lines.
pub fn format_entry(entry: &JournalEntry) -> String {
    let mut out = format!(
        "{HEADER_PREFIX} {} {} id={} context={}\n",
        entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        header_value(Some(entry.kind.as_str())),
        header_value(entry.correlation_id.as_deref()),
        header_value(entry.context.as_deref()),
    );
    for line in entry.content.split('\n') {
        if line.starts_with(HEADER_PREFIX) || line.starts_with(ESCAPE) {
            out.push(ESCAPE);
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn parse_header(line: &str, line_no: usize) -> Result<JournalEntry, JournalError> {
    let corrupt = |reason: &str| JournalError::Corrupt {
        line: line_no,
        reason: reason.to_string(),
    };

    let rest = line
        .strip_prefix(HEADER_PREFIX)
        .and_then(|r| r.strip_prefix(' '))
        .ok_or_else(|| corrupt("missing header prefix"))?;
    let (timestamp, rest) = rest.split_once(' ').ok_or_else(|| corrupt("missing kind"))?;
    let (kind, rest) = rest.split_once(' ').ok_or_else(|| corrupt("missing id"))?;
    let rest = rest.strip_prefix("id=").ok_or_else(|| corrupt("missing id"))?;
    let (id, context) = rest
        .split_once(" context=")
        .ok_or_else(|| corrupt("missing context"))?;

    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| corrupt(&format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);
    let optional = |v: &str| (v != NONE_MARKER).then(|| v.to_string());

    Ok(JournalEntry {
        timestamp,
        kind: kind.to_string(),
        correlation_id: optional(id),
        context: optional(context),
        content: String::new(),
    })
}

/// Parse a whole journal file.
pub fn parse_journal(text: &str) -> Result<Vec<JournalEntry>, JournalError> {
    let mut entries = Vec::new();
    let mut current: Option<(JournalEntry, Vec<&str>)> = None;

    let body = text.strip_suffix('\n').unwrap_or(text);
    if body.is_empty() {
        return Ok(entries);
    }

    for (i, line) in body.split('\n').enumerate() {
        let line_no = i + 1;
        if line.starts_with(HEADER_PREFIX) {
            if let Some((mut entry, lines)) = current.take() {
                entry.content = lines.join("\n");
                entries.push(entry);
            }
            current = Some((parse_header(line, line_no)?, Vec::new()));
            continue;
        }
        let Some((_, lines)) = current.as_mut() else {
            return Err(JournalError::Corrupt {
                line: line_no,
                reason: "body line before first header".to_string(),
            });
        };
        lines.push(line.strip_prefix(ESCAPE).unwrap_or(line));
    }

    if let Some((mut entry, lines)) = current {
        entry.content = lines.join("\n");
        entries.push(entry);
    }
    Ok(entries)
}
