//! Storage module - Durable local state.
//!
//! This module contains:
//! - NoteStore: the canonical local note collection (notes.json)
//! - CommitQueue: pending remote writes (queue.json)
//! - Atomic file helpers shared by both

pub mod commit_queue;
pub mod fs;
pub mod note_store;

pub use commit_queue::{CommitIntent, CommitOperation, CommitQueue};
pub use note_store::{MergeBase, NoteChange, NoteStore};
