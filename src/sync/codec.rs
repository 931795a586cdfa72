//! Note file codec.
//!
//! A remote note is Markdown with YAML front matter between `---` fences:
//!
//! ```text
//! ---
//! id: ...
//! title: ...
//! date: 2025-01-01
//! created_at: 2025-01-01T00:00:00Z
//! modified_at: 2025-01-01T00:00:00Z
//! ---
//!
//! body
//! ```
//!
//! `date` is the day of the last edit, written for the weekly release script
//! and ignored on read. Sync status is local bookkeeping and never written to
//! the remote.

use crate::error::{SyncError, SyncResult};
use crate::models::{Note, NoteId, SyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const FENCE: &str = "---";

/// Field order matters: `modified_at` is required and last, so a fence
/// candidate that cuts through a value never parses.
#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    id: String,
    title: String,
    #[serde(skip_deserializing)]
    date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

/// Render a note as a remote file.
pub fn encode_note(note: &Note) -> SyncResult<Vec<u8>> {
    let front = FrontMatter {
        id: note.id.to_string(),
        title: note.title.clone(),
        date: note.modified_at.format("%Y-%m-%d").to_string(),
        summary: note.summary.clone(),
        source_url: note.source_url.clone(),
        tags: note.tags.iter().cloned().collect(),
        category: note.category.clone(),
        created_at: note.created_at,
        modified_at: note.modified_at,
    };
    let yaml = serde_yaml::to_string(&front)
        .map_err(|e| SyncError::decoding(format!("Cannot encode front matter: {}", e)))?;

    Ok(format!("{FENCE}\n{yaml}{FENCE}\n\n{}", note.body).into_bytes())
}

/// Parse a remote file into a synced note.
pub fn decode_note(content: &[u8]) -> SyncResult<Note> {
    let text = std::str::from_utf8(content)
        .map_err(|e| SyncError::decoding(format!("Note is not UTF-8: {}", e)))?;

    let (front, body) = split_front_matter(text)?;

    let id = NoteId::from_string(front.id);
    if !id.is_path_safe() {
        return Err(SyncError::decoding(format!("Invalid note id '{}'", id)));
    }

    Ok(Note {
        id,
        title: front.title,
        summary: front.summary,
        body: body.to_string(),
        source_url: front.source_url,
        tags: front.tags.into_iter().collect(),
        category: front.category,
        created_at: front.created_at,
        modified_at: front.modified_at,
        sync_status: SyncStatus::Synced,
    })
}

/// Split at the first fence line whose preceding block parses as front
/// matter. Line endings are normalized inside the front matter only; the
/// body comes back byte for byte.
fn split_front_matter(text: &str) -> SyncResult<(FrontMatter, &str)> {
    let rest = strip_line_end(text.strip_prefix(FENCE).unwrap_or(""))
        .ok_or_else(|| SyncError::decoding("Missing front matter fence"))?;

    let mut last_error = None;
    for (idx, _) in rest.match_indices(FENCE) {
        if idx > 0 && !rest[..idx].ends_with('\n') {
            continue;
        }
        let after = &rest[idx + FENCE.len()..];
        let body = if after.is_empty() {
            ""
        } else {
            match strip_line_end(after) {
                Some(body) => body,
                None => continue,
            }
        };

        let yaml = rest[..idx].replace("\r\n", "\n");
        match serde_yaml::from_str::<FrontMatter>(&yaml) {
            Ok(front) => {
                // The blank separator line written by `encode_note`.
                let body = strip_line_end(body).unwrap_or(body);
                return Ok((front, body));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => SyncError::decoding(format!("Invalid front matter: {}", e)),
        None => SyncError::decoding("Unterminated front matter"),
    })
}

fn strip_line_end(s: &str) -> Option<&str> {
    s.strip_prefix("\r\n").or_else(|| s.strip_prefix('\n'))
}
