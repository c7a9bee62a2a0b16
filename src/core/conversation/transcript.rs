//! Conversation transcript.
//!
//! Append-only, except that the last streaming entry of a role grows in
//! place and is later flipped to final. At most one entry per role is
//! streaming at any time.

use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => f.write_str("user"),
            TranscriptRole::Assistant => f.write_str("assistant"),
        }
    }
}

/// One line of the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
    /// Still receiving deltas
    pub is_streaming: bool,
    /// When the entry was first appended
    pub timestamp: OffsetDateTime,
}

impl TranscriptEntry {
    fn new(role: TranscriptRole, text: String, is_streaming: bool) -> Self {
        Self {
            role,
            text,
            is_streaming,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationTranscript {
    entries: Vec<TranscriptEntry>,
}

impl ConversationTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of streaming entries for `role`; never more than one.
    pub fn streaming_count(&self, role: TranscriptRole) -> usize {
        self.entries
            .iter()
            .filter(|e| e.role == role && e.is_streaming)
            .count()
    }

    fn streaming_index(&self, role: TranscriptRole) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.role == role && e.is_streaming)
    }

    /// Grow the streaming entry for `role`, opening one if needed.
    pub fn append_delta(&mut self, role: TranscriptRole, delta: &str) -> TranscriptEntry {
        match self.streaming_index(role) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.text.push_str(delta);
                entry.clone()
            }
            None => {
                let entry = TranscriptEntry::new(role, delta.to_string(), true);
                self.entries.push(entry.clone());
                entry
            }
        }
    }

    /// Finalize the streaming entry for `role`.
    ///
    /// A final `text` replaces the accumulated deltas. Without a streaming
    /// entry, a non-empty final text is appended as a complete entry.
    pub fn finish(&mut self, role: TranscriptRole, text: Option<&str>) -> Option<TranscriptEntry> {
        match self.streaming_index(role) {
            Some(index) => {
                let entry = &mut self.entries[index];
                if let Some(text) = text
                    && !text.is_empty()
                {
                    entry.text = text.to_string();
                }
                entry.is_streaming = false;
                Some(entry.clone())
            }
            None => match text {
                Some(text) if !text.is_empty() => Some(self.push(role, text)),
                _ => None,
            },
        }
    }

    /// Close the streaming entry for `role` as-is, used on interruption.
    pub fn close_streaming(&mut self, role: TranscriptRole) -> Option<TranscriptEntry> {
        let index = self.streaming_index(role)?;
        let entry = &mut self.entries[index];
        entry.is_streaming = false;
        Some(entry.clone())
    }

    /// Append a complete entry.
    pub fn push(&mut self, role: TranscriptRole, text: &str) -> TranscriptEntry {
        let entry = TranscriptEntry::new(role, text.to_string(), false);
        self.entries.push(entry.clone());
        entry
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
