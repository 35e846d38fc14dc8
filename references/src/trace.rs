//! Audit trail of one resolution pass.

use serde::{Deserialize, Serialize};

/// One resolution attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionTraceEntry {
    /// Lowercase tag source ("file", "note", ...).
    pub source: String,

    /// Identifier the tag carried.
    pub identifier: String,

    /// Retrieval query in effect, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Number of content pieces that went into the replacement.
    pub result_count: usize,

    /// Shortened display preview of inlined content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,

    /// What went wrong, when the attempt degraded to a placeholder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolutionTraceEntry {
    /// Create an entry for one attempt.
    pub fn new(source: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            identifier: identifier.into(),
            query: None,
            result_count: 0,
            preview: None,
            error: None,
        }
    }

    /// Record the query in effect.
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query.map(str::to_string);
        self
    }

    /// Record how many pieces the replacement holds.
    pub fn with_result_count(mut self, count: usize) -> Self {
        self.result_count = count;
        self
    }

    /// Record a display preview.
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    /// Record a degradation reason.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Ordered log of every resolution attempt in one pass, in document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionTrace {
    /// The attempts.
    pub entries: Vec<ResolutionTraceEntry>,
}

impl ResolutionTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attempt.
    pub fn push(&mut self, entry: ResolutionTraceEntry) {
        self.entries.push(entry);
    }

    /// Number of attempts recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether anything was attempted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attempts that degraded to a placeholder.
    pub fn failures(&self) -> impl Iterator<Item = &ResolutionTraceEntry> {
        self.entries.iter().filter(|e| e.error.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trace_collects_entries_in_order() {
        let mut trace = ResolutionTrace::new();
        trace.push(ResolutionTraceEntry::new("file", "a").with_result_count(1));
        trace.push(
            ResolutionTraceEntry::new("note", "b").with_error("content not found: b"),
        );

        assert_eq!(trace.len(), 2);
        assert_eq!(trace.entries[0].identifier, "a");
        assert_eq!(trace.failures().count(), 1);
    }
}
