//! Formatters module - Renders notes into publishable documents.

pub mod digest;

use crate::models::Note;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trait for aggregate document formatters
pub trait Formatter {
    /// Render the document for `notes` as of `now`
    fn format(&self, notes: &[Note], now: DateTime<Utc>) -> Result<String>;

    /// File name for a local copy of the document
    fn generate_filename(&self, now: DateTime<Utc>) -> String;
}
