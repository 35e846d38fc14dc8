//! Bounded, order-preserving document splitting.
//!
//! Large documents are cut into fragments no longer than the configured
//! chunk size. The primary strategy accumulates whole paragraphs; a
//! document with no paragraph boundaries falls back to sentence
//! accumulation, and a single oversized sentence is cut at character
//! boundaries as a last resort. Concatenating the fragments reconstructs
//! the source text modulo the whitespace that sat on the split points.

use muse_embeddings::Embedding;
use serde::{Deserialize, Serialize};

/// A bounded slice of a larger document, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Identifier of the source document.
    pub source_id: String,

    /// Position of this fragment within the source, 0-based.
    ///
    /// Ordinal-based identity makes re-indexing an overwrite, never a
    /// duplicate.
    pub ordinal: usize,

    /// Fragment text.
    pub text: String,

    /// Embedding, once computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Fragment {
    /// Create a fragment without an embedding.
    pub fn new(source_id: impl Into<String>, ordinal: usize, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ordinal,
            text: text.into(),
            embedding: None,
        }
    }

    /// Attach an embedding.
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Split text into ordered fragments of at most `chunk_size` characters.
///
/// Any non-empty input produces at least one fragment.
pub fn split(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    if text.is_empty() {
        return Vec::new();
    }
    if text.trim().is_empty() {
        return hard_split(text, chunk_size);
    }

    let paragraphs = split_paragraphs(text);
    if paragraphs.len() > 1 {
        accumulate(paragraphs, chunk_size, "\n\n")
    } else {
        accumulate(split_sentences(text), chunk_size, "")
    }
}

/// Split source text into fragments owned by `source_id`.
pub fn split_into_fragments(source_id: &str, text: &str, chunk_size: usize) -> Vec<Fragment> {
    split(text, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| Fragment::new(source_id, ordinal, text))
        .collect()
}

/// Greedily pack units into fragments bounded by `chunk_size` characters.
fn accumulate(units: Vec<String>, chunk_size: usize, sep: &str) -> Vec<String> {
    let sep_len = sep.chars().count();
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for unit in units {
        let unit_len = unit.chars().count();

        if unit_len > chunk_size {
            if !current.is_empty() {
                fragments.push(std::mem::take(&mut current));
                current_len = 0;
            }
            // An oversized unit is cut on its own: sentences first, then
            // raw character boundaries.
            if sep.is_empty() {
                fragments.extend(hard_split(&unit, chunk_size));
            } else {
                fragments.extend(accumulate(split_sentences(&unit), chunk_size, ""));
            }
            continue;
        }

        let projected = if current.is_empty() {
            unit_len
        } else {
            current_len + sep_len + unit_len
        };
        if projected > chunk_size && !current.is_empty() {
            fragments.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if current.is_empty() {
            current_len = unit_len;
            current = unit;
        } else {
            current.push_str(sep);
            current.push_str(&unit);
            current_len += sep_len + unit_len;
        }
    }

    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

/// Split on blank-line paragraph boundaries.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

/// Split on sentence terminators, CJK and Latin, keeping the terminator.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '。' | '！' | '？' | '.' | '!' | '?' | '\n') {
            if current.trim().is_empty() {
                current.clear();
            } else {
                sentences.push(std::mem::take(&mut current));
            }
        }
    }

    if !current.trim().is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Cut at raw character boundaries.
fn hard_split(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn without_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_split_empty_input() {
        assert!(split("", 100).is_empty());
    }

    #[test]
    fn test_split_returns_at_least_one_fragment() {
        assert_eq!(split("short", 100), vec!["short".to_string()]);
    }

    #[test]
    fn test_split_accumulates_paragraphs() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let fragments = split(text, 40);

        assert!(fragments.len() >= 2);
        for fragment in &fragments {
            assert!(fragment.chars().count() <= 40);
        }
        assert_eq!(
            without_whitespace(&fragments.concat()),
            without_whitespace(text)
        );
    }

    #[test]
    fn test_split_sentence_fallback_for_single_block() {
        let text = "春天来了。花开了。鸟儿回来了。天气也暖和了。";
        let fragments = split(text, 10);

        assert!(fragments.len() > 1);
        for fragment in &fragments {
            assert!(fragment.chars().count() <= 10);
        }
        assert_eq!(
            without_whitespace(&fragments.concat()),
            without_whitespace(text)
        );
    }

    #[test]
    fn test_split_hard_splits_oversized_sentence() {
        let text = "嗯".repeat(25);
        let fragments = split(&text, 10);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].chars().count(), 10);
        assert_eq!(fragments[2].chars().count(), 5);
        assert_eq!(fragments.concat(), text);
    }

    #[test]
    fn test_split_oversized_paragraph_is_cut_alone() {
        let big = "word ".repeat(50);
        let text = format!("small one\n\n{big}\n\nsmall two");
        let fragments = split(&text, 60);

        for fragment in &fragments {
            assert!(fragment.chars().count() <= 60, "fragment too long");
        }
        assert_eq!(
            without_whitespace(&fragments.concat()),
            without_whitespace(&text)
        );
    }

    #[test]
    fn test_split_into_fragments_assigns_ordinals() {
        let fragments = split_into_fragments("doc1", "a\n\nb\n\nc", 1);
        let ordinals: Vec<usize> = fragments.iter().map(|f| f.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert!(fragments.iter().all(|f| f.source_id == "doc1"));
    }
}
