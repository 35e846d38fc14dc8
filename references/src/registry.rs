//! Reference tag syntax and the scanning pass.
//!
//! The registry owns every recognized tag form and produces all tags in a
//! single left-to-right pass, so overlap between kinds cannot depend on the
//! order of per-kind scans. Parsing is pure: no I/O, no clock.
//!
//! Recognized forms:
//!
//! | Form | Example |
//! |------|---------|
//! | shorthand | `@character_profile_1` |
//! | note | `@note[id-or-title]` |
//! | session | `@session[text]` |
//! | file | `@file[id-or-name]`, `@file[id-or-name, query]` |
//! | user | `@user[text]` |
//! | time | `@time[now\|date\|time\|format]` |

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// The kind of an inline reference tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    /// `@note[...]` — a stored note by id or title.
    Note,
    /// `@session[...]` — recent session history.
    Session,
    /// `@file[...]` — a stored or local file, optionally with a query hint.
    File,
    /// `@user[...]` — passthrough annotation.
    User,
    /// `@time[...]` — current timestamp rendering.
    Time,
    /// `@<prefix>_<index>` — indexed entry of a content category.
    Shorthand,
    /// Recognized delimiter with an unregistered kind word.
    Unknown,
}

impl TagKind {
    /// Capitalized label used in bracketed placeholder markers.
    pub fn label(&self) -> &'static str {
        match self {
            TagKind::Note => "Note",
            TagKind::Session => "Session",
            TagKind::File => "File",
            TagKind::User => "User",
            TagKind::Time => "Time",
            TagKind::Shorthand => "Reference",
            TagKind::Unknown => "Unknown",
        }
    }

    /// Lowercase source name used in trace entries.
    pub fn source(&self) -> &'static str {
        match self {
            TagKind::Note => "note",
            TagKind::Session => "session",
            TagKind::File => "file",
            TagKind::User => "user",
            TagKind::Time => "time",
            TagKind::Shorthand => "shorthand",
            TagKind::Unknown => "unknown",
        }
    }
}

/// One reference occurrence found by a scan.
///
/// `start..end` is the byte span of the whole tag in the scanned text, so
/// splicing replacements right-to-left never shifts earlier spans.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTag {
    /// Which tag form matched.
    pub kind: TagKind,

    /// Byte offset of the `@`.
    pub start: usize,

    /// Byte offset one past the end of the tag.
    pub end: usize,

    /// The identifier payload (for shorthand, the whole `prefix_index` word).
    pub identifier: String,

    /// Optional retrieval query carried by the tag itself.
    pub query_hint: Option<String>,
}

impl ReferenceTag {
    /// For shorthand tags, the registered category and its 1-based index.
    pub fn shorthand_parts(&self) -> Option<(&str, usize)> {
        split_shorthand(&self.identifier)
    }
}

/// Split `prefix_3` into `("prefix", 3)`.
fn split_shorthand(word: &str) -> Option<(&str, usize)> {
    let pos = word.rfind('_')?;
    let (prefix, digits) = (&word[..pos], &word[pos + 1..]);
    if prefix.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: usize = digits.parse().ok()?;
    Some((prefix, index))
}

/// Registry of recognized tag syntaxes.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    bracket_kinds: HashMap<&'static str, TagKind>,
    shorthand_prefixes: BTreeSet<String>,
}

impl PatternRegistry {
    /// Create a registry with the built-in bracket kinds and shorthand
    /// categories.
    pub fn new() -> Self {
        let bracket_kinds = HashMap::from([
            ("note", TagKind::Note),
            ("session", TagKind::Session),
            ("file", TagKind::File),
            ("user", TagKind::User),
            ("time", TagKind::Time),
        ]);

        let shorthand_prefixes = [
            "character_profile",
            "world_setting",
            "plot_outline",
            "style_guide",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        Self {
            bracket_kinds,
            shorthand_prefixes,
        }
    }

    /// Register an additional shorthand category.
    pub fn with_shorthand_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shorthand_prefixes.insert(prefix.into());
        self
    }

    /// Whether a shorthand category is registered.
    pub fn has_shorthand_prefix(&self, prefix: &str) -> bool {
        self.shorthand_prefixes.contains(prefix)
    }

    /// Scan text for reference tags, ordered by start offset.
    ///
    /// An `@` embedded in a word (email addresses) does not start a tag. A
    /// bracket form with an unregistered kind word still produces a tag, as
    /// [`TagKind::Unknown`]; a bare `@word` that is not a registered
    /// shorthand is left untouched.
    pub fn scan(&self, text: &str) -> Vec<ReferenceTag> {
        let bytes = text.as_bytes();
        let mut tags = Vec::new();
        let mut prev: Option<char> = None;
        let mut i = 0;

        while i < text.len() {
            let Some(c) = text[i..].chars().next() else {
                break;
            };
            if c != '@' {
                prev = Some(c);
                i += c.len_utf8();
                continue;
            }
            if prev.is_some_and(char::is_alphanumeric) {
                prev = Some(c);
                i += 1;
                continue;
            }

            // Tag words are ASCII identifiers.
            let word_start = i + 1;
            let mut word_end = word_start;
            while word_end < bytes.len()
                && (bytes[word_end].is_ascii_alphanumeric() || bytes[word_end] == b'_')
            {
                word_end += 1;
            }
            if word_end == word_start {
                prev = Some('@');
                i += 1;
                continue;
            }
            let word = &text[word_start..word_end];

            if bytes.get(word_end) == Some(&b'[') {
                if let Some(rel) = text[word_end + 1..].find(']') {
                    let payload = &text[word_end + 1..word_end + 1 + rel];
                    let end = word_end + 1 + rel + 1;
                    let kind = self
                        .bracket_kinds
                        .get(word)
                        .copied()
                        .unwrap_or(TagKind::Unknown);
                    let (identifier, query_hint) = split_payload(kind, payload);
                    tags.push(ReferenceTag {
                        kind,
                        start: i,
                        end,
                        identifier,
                        query_hint,
                    });
                    prev = Some(']');
                    i = end;
                    continue;
                }
                // Unclosed bracket: not a tag.
                prev = Some('[');
                i = word_end + 1;
                continue;
            }

            if let Some((prefix, index)) = split_shorthand(word) {
                if index >= 1 && self.shorthand_prefixes.contains(prefix) {
                    tags.push(ReferenceTag {
                        kind: TagKind::Shorthand,
                        start: i,
                        end: word_end,
                        identifier: word.to_string(),
                        query_hint: None,
                    });
                    prev = Some(']');
                    i = word_end;
                    continue;
                }
            }

            prev = word.chars().last();
            i = word_end;
        }

        tags
    }

    /// Group the identifiers of all tags in `text` by kind.
    ///
    /// Introspection only: nothing is resolved.
    pub fn extract_grouped(&self, text: &str) -> HashMap<TagKind, Vec<String>> {
        let mut grouped: HashMap<TagKind, Vec<String>> = HashMap::new();
        for tag in self.scan(text) {
            grouped.entry(tag.kind).or_default().push(tag.identifier);
        }
        grouped
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a bracket payload into identifier and optional query hint.
fn split_payload(kind: TagKind, payload: &str) -> (String, Option<String>) {
    if kind == TagKind::File {
        if let Some((id, hint)) = payload.split_once(',') {
            let hint = hint.trim();
            return (
                id.trim().to_string(),
                if hint.is_empty() {
                    None
                } else {
                    Some(hint.to_string())
                },
            );
        }
    }
    (payload.trim().to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> PatternRegistry {
        PatternRegistry::new()
    }

    #[test]
    fn test_scan_bracket_forms() {
        let text = "see @note[plot ideas] and @file[draft.md]";
        let tags = registry().scan(text);

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].kind, TagKind::Note);
        assert_eq!(tags[0].identifier, "plot ideas");
        assert_eq!(&text[tags[0].start..tags[0].end], "@note[plot ideas]");
        assert_eq!(tags[1].kind, TagKind::File);
        assert_eq!(tags[1].identifier, "draft.md");
    }

    #[test]
    fn test_scan_file_with_query_hint() {
        let tags = registry().scan("@file[chapter2.txt, 情绪弹簧]");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].identifier, "chapter2.txt");
        assert_eq!(tags[0].query_hint.as_deref(), Some("情绪弹簧"));
    }

    #[test]
    fn test_scan_unknown_kind_in_delimiter() {
        let tags = registry().scan("@widget[abc]");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].kind, TagKind::Unknown);
        assert_eq!(tags[0].identifier, "abc");
    }

    #[test]
    fn test_scan_shorthand() {
        let tags = registry().scan("用 @character_profile_1 的语气");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].kind, TagKind::Shorthand);
        assert_eq!(tags[0].identifier, "character_profile_1");
        assert_eq!(tags[0].shorthand_parts(), Some(("character_profile", 1)));
    }

    #[test]
    fn test_scan_ignores_unregistered_shorthand() {
        let tags = registry().scan("email me @mystery_7 ok");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_scan_ignores_email_addresses() {
        let tags = registry().scan("write to ann@note.example about @note[x]");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].identifier, "x");
    }

    #[test]
    fn test_scan_ignores_unclosed_bracket() {
        let tags = registry().scan("@note[never closed");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_scan_orders_by_start_offset() {
        let tags = registry().scan("@time[now] then @user[me] then @session[yesterday]");
        let starts: Vec<usize> = tags.iter().map(|t| t.start).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_extract_grouped() {
        let grouped = registry().extract_grouped("@note[a] @note[b] @file[c]");
        assert_eq!(
            grouped.get(&TagKind::Note),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(grouped.get(&TagKind::File), Some(&vec!["c".to_string()]));
    }

    #[test]
    fn test_custom_shorthand_prefix() {
        let registry = PatternRegistry::new().with_shorthand_prefix("scene_card");
        let tags = registry.scan("@scene_card_2");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].shorthand_parts(), Some(("scene_card", 2)));
    }
}
