//! Content lookup across backing stores.
//!
//! The `ContentLocator` maps a reference identifier to a [`ContentRecord`]
//! by trying the backing stores in a fixed priority order. It owns no
//! content; every record is a read-only view fetched on demand.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Lookup scoping for one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Owning user.
    pub user_id: String,

    /// Current session.
    pub session_id: String,

    /// Active project, when the caller is working inside one.
    pub project_id: Option<String>,
}

impl Scope {
    /// Create a scope without a project.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            project_id: None,
        }
    }

    /// Set the active project.
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Opaque token identifying this scope in fragment-index keys.
    pub fn key(&self) -> String {
        match &self.project_id {
            Some(project) => format!("{}/{project}", self.user_id),
            None => format!("{}/{}", self.user_id, self.session_id),
        }
    }
}

/// Where a content record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A stored note.
    Note,
    /// A file attached to the active project.
    ProjectFile,
    /// A file in the user's generic file store.
    StoredFile,
    /// A file read from the local filesystem.
    LocalFile,
}

/// Read-only view of one piece of located content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Stable identifier of the source.
    pub source_id: String,

    /// Human-readable name (title or filename).
    pub name: String,

    /// Which store produced the record.
    pub kind: SourceKind,

    /// UTF-8 encoded size of the content.
    pub size_bytes: u64,

    text: String,
}

impl ContentRecord {
    /// Create a record; the size is derived from the text.
    pub fn new(
        source_id: impl Into<String>,
        name: impl Into<String>,
        kind: SourceKind,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            source_id: source_id.into(),
            name: name.into(),
            kind,
            size_bytes: text.len() as u64,
            text,
        }
    }

    /// The canonical text accessor.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the content is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A stored note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Note id.
    pub id: String,

    /// Note title.
    pub title: String,

    /// Note body.
    pub content: String,
}

/// A file in a user or project store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    /// File id.
    pub id: String,

    /// Filename.
    pub name: String,

    /// File content.
    pub content: String,
}

/// A past session summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: String,

    /// Session title.
    pub title: String,

    /// Short summary of what happened in the session.
    pub summary: String,
}

/// Read-only contract over the note/file/session backends.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch a note by id.
    async fn get_note(&self, id: &str) -> Result<Option<NoteRecord>>;

    /// Search notes by title or body, scoped to the caller.
    ///
    /// Results are in the backend's stable display order; shorthand
    /// references index into that order.
    async fn search_notes(&self, query: &str, scope: &Scope) -> Result<Vec<NoteRecord>>;

    /// Fetch a stored file by id.
    async fn get_file(&self, id: &str) -> Result<Option<StoredFile>>;

    /// List the user's stored files.
    async fn list_user_files(&self, user_id: &str) -> Result<Vec<StoredFile>>;

    /// Fetch a project file by id or exact filename.
    async fn get_project_file(&self, project_id: &str, id_or_name: &str)
    -> Result<Option<StoredFile>>;

    /// List a project's files.
    async fn list_project_files(&self, project_id: &str) -> Result<Vec<StoredFile>>;

    /// Search recent session history.
    async fn search_sessions(&self, query: &str, scope: &Scope) -> Result<Vec<SessionRecord>>;
}

/// Maps identifiers to content records across the backing stores.
pub struct ContentLocator {
    store: Arc<dyn ContentStore>,
}

impl ContentLocator {
    /// Create a locator over the given store.
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Resolve an identifier to content, first match wins:
    ///
    /// 1. project file by id or exact filename
    /// 2. project file by case-insensitive filename
    /// 3. stored file by id
    /// 4. user file by exact filename
    /// 5. existing local filesystem path
    pub async fn locate(&self, scope: &Scope, identifier: &str) -> Result<Option<ContentRecord>> {
        if let Some(project_id) = &scope.project_id {
            if let Some(file) = self.store.get_project_file(project_id, identifier).await? {
                debug!("Located {identifier} as project file {}", file.id);
                return Ok(Some(record_from_file(file, SourceKind::ProjectFile)));
            }

            let lowered = identifier.to_lowercase();
            let files = self.store.list_project_files(project_id).await?;
            if let Some(file) = files.into_iter().find(|f| f.name.to_lowercase() == lowered) {
                debug!("Located {identifier} as project file {} (case-folded)", file.id);
                return Ok(Some(record_from_file(file, SourceKind::ProjectFile)));
            }
        }

        if let Some(file) = self.store.get_file(identifier).await? {
            debug!("Located {identifier} as stored file {}", file.id);
            return Ok(Some(record_from_file(file, SourceKind::StoredFile)));
        }

        let files = self.store.list_user_files(&scope.user_id).await?;
        if let Some(file) = files.into_iter().find(|f| f.name == identifier) {
            debug!("Located {identifier} as user file {}", file.id);
            return Ok(Some(record_from_file(file, SourceKind::StoredFile)));
        }

        self.locate_local(identifier).await
    }

    /// Resolve a note by id when the identifier parses as a UUID, else by a
    /// best-effort title search returning the first hit.
    pub async fn locate_note(
        &self,
        scope: &Scope,
        id_or_title: &str,
    ) -> Result<Option<NoteRecord>> {
        if Uuid::parse_str(id_or_title).is_ok() {
            if let Some(note) = self.store.get_note(id_or_title).await? {
                return Ok(Some(note));
            }
        }

        let mut hits = self.store.search_notes(id_or_title, scope).await?;
        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(hits.remove(0)))
    }

    /// Read an existing local file, tolerating unreadable paths.
    async fn locate_local(&self, identifier: &str) -> Result<Option<ContentRecord>> {
        let path = Path::new(identifier);
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return Ok(None);
        };
        if !meta.is_file() {
            return Ok(None);
        }

        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| identifier.to_string());
                Ok(Some(ContentRecord::new(
                    identifier,
                    name,
                    SourceKind::LocalFile,
                    text,
                )))
            }
            Err(e) => {
                warn!("Local file {identifier} exists but is unreadable: {e}");
                Ok(None)
            }
        }
    }
}

fn record_from_file(file: StoredFile, kind: SourceKind) -> ContentRecord {
    ContentRecord::new(file.id, file.name, kind, file.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    struct EmptyStore;

    #[async_trait]
    impl ContentStore for EmptyStore {
        async fn get_note(&self, _id: &str) -> Result<Option<NoteRecord>> {
            Ok(None)
        }
        async fn search_notes(&self, _query: &str, _scope: &Scope) -> Result<Vec<NoteRecord>> {
            Ok(Vec::new())
        }
        async fn get_file(&self, _id: &str) -> Result<Option<StoredFile>> {
            Ok(None)
        }
        async fn list_user_files(&self, _user_id: &str) -> Result<Vec<StoredFile>> {
            Ok(Vec::new())
        }
        async fn get_project_file(
            &self,
            _project_id: &str,
            _id_or_name: &str,
        ) -> Result<Option<StoredFile>> {
            Ok(None)
        }
        async fn list_project_files(&self, _project_id: &str) -> Result<Vec<StoredFile>> {
            Ok(Vec::new())
        }
        async fn search_sessions(&self, _query: &str, _scope: &Scope) -> Result<Vec<SessionRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_scope_key_prefers_project() {
        let scope = Scope::new("u1", "s1").with_project("p1");
        assert_eq!(scope.key(), "u1/p1");
        assert_eq!(Scope::new("u1", "s1").key(), "u1/s1");
    }

    #[test]
    fn test_content_record_size_is_utf8_bytes() {
        let record = ContentRecord::new("id", "名字.txt", SourceKind::StoredFile, "汉字");
        assert_eq!(record.size_bytes, 6);
        assert_eq!(record.text(), "汉字");
    }

    #[tokio::test]
    async fn test_locate_falls_through_to_local_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "local content").unwrap();

        let locator = ContentLocator::new(Arc::new(EmptyStore));
        let scope = Scope::new("u1", "s1");

        let record = locator
            .locate(&scope, &tmp.path().to_string_lossy())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.kind, SourceKind::LocalFile);
        assert!(record.text().contains("local content"));
    }

    #[tokio::test]
    async fn test_locate_miss_is_none_not_error() {
        let locator = ContentLocator::new(Arc::new(EmptyStore));
        let scope = Scope::new("u1", "s1").with_project("p1");

        let record = locator.locate(&scope, "no-such-thing").await.unwrap();
        assert!(record.is_none());
    }
}
