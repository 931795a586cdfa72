//! Weekly digest formatter
//!
//! Groups the notes touched in the last `days` days by category and renders
//! them as one Markdown document.

use super::Formatter;
use crate::models::Note;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

const DEFAULT_CATEGORY: &str = "General";
const EXCERPT_CHARS: usize = 500;

pub struct WeeklyDigest {
    days: i64,
}

impl WeeklyDigest {
    pub fn new(days: i64) -> Self {
        Self { days: days.max(1) }
    }

    /// Notes modified inside the window, newest first.
    fn recent<'a>(&self, notes: &'a [Note], now: DateTime<Utc>) -> Vec<&'a Note> {
        let cutoff = now - Duration::days(self.days);
        let mut recent: Vec<&Note> = notes
            .iter()
            .filter(|n| n.modified_at >= cutoff && n.modified_at <= now)
            .collect();
        recent.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.id.cmp(&b.id)));
        recent
    }

    /// First `EXCERPT_CHARS` characters of the body (at char boundary)
    fn excerpt(body: &str) -> String {
        let body = body.trim();
        if body.chars().count() <= EXCERPT_CHARS {
            return body.to_string();
        }
        let cut: String = body.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

impl Default for WeeklyDigest {
    fn default() -> Self {
        Self::new(7)
    }
}

impl Formatter for WeeklyDigest {
    fn format(&self, notes: &[Note], now: DateTime<Utc>) -> Result<String> {
        let date = now.format("%Y-%m-%d");
        let mut output = format!("# Weekly Review - {}\n\n", date);

        let recent = self.recent(notes, now);
        if recent.is_empty() {
            output.push_str("No notes found for this week.\n");
            return Ok(output);
        }

        let from = (now - Duration::days(self.days)).format("%Y-%m-%d");
        output.push_str(&format!(
            "_{} notes from {} to {}_\n\n",
            recent.len(),
            from,
            date
        ));

        let mut by_category: BTreeMap<&str, Vec<&Note>> = BTreeMap::new();
        for note in recent {
            let category = note
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CATEGORY);
            by_category.entry(category).or_default().push(note);
        }

        for (category, notes) in by_category {
            output.push_str(&format!("## {} ({})\n\n", category, notes.len()));

            for note in notes {
                let title = if note.title.trim().is_empty() {
                    "Untitled"
                } else {
                    note.title.trim()
                };
                output.push_str(&format!("### {}\n\n", title));
                output.push_str(&format!("*{}*", note.modified_at.format("%Y-%m-%d")));
                if !note.tags.is_empty() {
                    let tags: Vec<&str> = note.tags.iter().map(String::as_str).collect();
                    output.push_str(&format!(" · {}", tags.join(", ")));
                }
                output.push_str("\n\n");

                if !note.summary.trim().is_empty() {
                    output.push_str(&format!("> {}\n\n", note.summary.trim()));
                }
                if let Some(url) = &note.source_url {
                    output.push_str(&format!("Source: <{}>\n\n", url));
                }

                let excerpt = Self::excerpt(&note.body);
                if !excerpt.is_empty() {
                    output.push_str(&excerpt);
                    output.push_str("\n\n");
                }
            }
        }

        Ok(output)
    }

    fn generate_filename(&self, now: DateTime<Utc>) -> String {
        format!("{}-Weekly-Review.md", now.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn note_at(title: &str, category: Option<&str>, created: DateTime<Utc>) -> Note {
        let mut note = Note::new(title, format!("{} body", title));
        note.category = category.map(String::from);
        note.created_at = created;
        note.modified_at = created;
        note
    }

    #[test]
    fn test_groups_recent_notes_by_category() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let notes = vec![
            note_at("Ownership", Some("Rust"), now - Duration::days(1)),
            note_at("Loose idea", None, now - Duration::days(2)),
            note_at("Lifetimes", Some("Rust"), now - Duration::hours(3)),
            note_at("Ancient", Some("Rust"), now - Duration::days(30)),
        ];

        let output = WeeklyDigest::default().format(&notes, now).unwrap();
        assert!(output.starts_with("# Weekly Review - 2025-03-10\n"));
        assert!(output.contains("_3 notes from 2025-03-03 to 2025-03-10_"));
        assert!(output.contains("## General (1)"));
        assert!(output.contains("## Rust (2)"));
        assert!(!output.contains("Ancient"));

        // Categories alphabetical, newest note first within a category
        let general = output.find("## General").unwrap();
        let rust = output.find("## Rust").unwrap();
        assert!(general < rust);
        assert!(output.find("### Lifetimes").unwrap() < output.find("### Ownership").unwrap());
    }

    #[test]
    fn test_empty_week() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let output = WeeklyDigest::default().format(&[], now).unwrap();
        assert!(output.contains("No notes found for this week."));
    }

    #[test]
    fn test_long_body_is_truncated_at_char_boundary() {
        let body = "é".repeat(EXCERPT_CHARS + 10);
        let excerpt = WeeklyDigest::excerpt(&body);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_filename() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(
            WeeklyDigest::default().generate_filename(now),
            "2025-03-10-Weekly-Review.md"
        );
    }
}
