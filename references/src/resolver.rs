//! The reference resolver.
//!
//! `resolve()` scans free text for `@` reference tags, resolves each one
//! against the backing stores, and splices the results back into the text.
//! The function is total: every failure, including timeouts and unavailable
//! backends, degrades to a bracketed placeholder, because the output feeds
//! directly into prompt construction and must never abort it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use muse_embeddings::{Embedding, EmbeddingGateway, EmbeddingRequest, rank_top_k};

use crate::cache::{CachedResolution, ResolutionCache};
use crate::config::ResolverConfig;
use crate::error::{ReferenceError, Result};
use crate::index::{FragmentIndex, VectorStore};
use crate::locator::{ContentLocator, ContentRecord, ContentStore, Scope};
use crate::registry::{PatternRegistry, ReferenceTag, TagKind};
use crate::splitter::{self, Fragment};
use crate::trace::{ResolutionTrace, ResolutionTraceEntry};

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// The outcome of one resolution pass.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Text with every tag replaced by content or a placeholder.
    pub text: String,

    /// One entry per resolution attempt, in document order.
    pub trace: ResolutionTrace,
}

/// Resolves inline `@` references against injected backends.
///
/// All collaborators are trait objects handed in at construction, so tests
/// can substitute deterministic fakes; the resolver holds no process-wide
/// state.
pub struct ReferenceResolver {
    config: ResolverConfig,
    registry: PatternRegistry,
    store: Arc<dyn ContentStore>,
    locator: ContentLocator,
    gateway: Arc<dyn EmbeddingGateway>,
    index: FragmentIndex,
    cache: ResolutionCache,
}

impl ReferenceResolver {
    /// Create a resolver over the given backends. `vector_store` is
    /// optional; without it the fragment index degrades to a no-op.
    pub fn new(
        store: Arc<dyn ContentStore>,
        gateway: Arc<dyn EmbeddingGateway>,
        vector_store: Option<Arc<dyn VectorStore>>,
        config: ResolverConfig,
    ) -> Self {
        let locator = ContentLocator::new(store.clone());
        let index = FragmentIndex::new(vector_store, config.search_timeout());
        let cache = ResolutionCache::new(config.cache.clone());
        Self {
            registry: PatternRegistry::new(),
            store,
            locator,
            gateway,
            index,
            cache,
            config,
        }
    }

    /// Replace the tag registry (e.g. to add shorthand categories).
    pub fn with_registry(mut self, registry: PatternRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Group the identifiers of all tags in `text` by kind, without
    /// resolving anything.
    pub fn extract_tags(&self, text: &str) -> HashMap<TagKind, Vec<String>> {
        self.registry.extract_grouped(text)
    }

    /// Resolve every reference tag in `text`.
    ///
    /// `query` is the caller's current intent, used only by retrieval-path
    /// resolutions. Always returns; never panics or errors.
    pub async fn resolve(&self, text: &str, scope: &Scope, query: Option<&str>) -> Resolution {
        self.resolve_with_cancel(text, scope, query, &CancellationToken::new())
            .await
    }

    /// Like [`resolve`](Self::resolve), checking `cancel` between fragment
    /// embeddings. A cancelled pass still returns a valid (possibly
    /// partial) resolution.
    pub async fn resolve_with_cancel(
        &self,
        text: &str,
        scope: &Scope,
        query: Option<&str>,
        cancel: &CancellationToken,
    ) -> Resolution {
        if text.is_empty() {
            return Resolution {
                text: String::new(),
                trace: ResolutionTrace::new(),
            };
        }

        let tags = self.registry.scan(text);
        if tags.is_empty() {
            return Resolution {
                text: text.to_string(),
                trace: ResolutionTrace::new(),
            };
        }

        if let Some(hit) = self.cache.get(scope, text, query).await {
            return Resolution {
                text: hit.text,
                trace: hit.trace,
            };
        }

        debug!("Resolving {} reference tags", tags.len());

        let mut resolved = text.to_string();
        let mut entries = Vec::with_capacity(tags.len());
        // Splice right-to-left so earlier replacements never shift the
        // spans of tags still waiting to be processed.
        for tag in tags.iter().rev() {
            let (replacement, entry) = self.resolve_tag(tag, scope, query, cancel).await;
            resolved.replace_range(tag.start..tag.end, &replacement);
            entries.push(entry);
        }
        entries.reverse();

        let trace = ResolutionTrace { entries };
        self.cache
            .put(
                scope,
                text,
                query,
                CachedResolution {
                    text: resolved.clone(),
                    trace: trace.clone(),
                },
            )
            .await;

        Resolution {
            text: resolved,
            trace,
        }
    }

    /// Resolve one tag. Total: failures become placeholder markers.
    async fn resolve_tag(
        &self,
        tag: &ReferenceTag,
        scope: &Scope,
        query: Option<&str>,
        cancel: &CancellationToken,
    ) -> (String, ResolutionTraceEntry) {
        let result = match tag.kind {
            TagKind::Time => Ok(self.resolve_time(tag)),
            TagKind::User => Ok(self.resolve_user(tag)),
            TagKind::Note => self.resolve_note(tag, scope).await,
            TagKind::Session => self.resolve_session(tag, scope).await,
            TagKind::Shorthand => self.resolve_shorthand(tag, scope).await,
            TagKind::File => self.resolve_file(tag, scope, query, cancel).await,
            TagKind::Unknown => Err(ReferenceError::UnknownTag(tag.identifier.clone())),
        };

        match result {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("Tag @{} degraded to placeholder: {e}", tag.identifier);
                let marker = marker_for(tag, &e);
                let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
                    .with_error(e.to_string());
                (marker, entry)
            }
        }
    }

    fn resolve_time(&self, tag: &ReferenceTag) -> (String, ResolutionTraceEntry) {
        let rendered = render_time(&tag.identifier);
        let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
            .with_result_count(1);
        (rendered, entry)
    }

    fn resolve_user(&self, tag: &ReferenceTag) -> (String, ResolutionTraceEntry) {
        let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
            .with_result_count(1);
        (tag.identifier.clone(), entry)
    }

    async fn resolve_note(
        &self,
        tag: &ReferenceTag,
        scope: &Scope,
    ) -> Result<(String, ResolutionTraceEntry)> {
        let note = bounded(
            self.config.fetch_timeout(),
            "note lookup",
            self.locator.locate_note(scope, &tag.identifier),
        )
        .await?
        .ok_or_else(|| ReferenceError::NotFound(tag.identifier.clone()))?;

        let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
            .with_result_count(1)
            .with_preview(truncate_chars(&note.content, self.config.preview_chars));
        Ok((note.content, entry))
    }

    async fn resolve_session(
        &self,
        tag: &ReferenceTag,
        scope: &Scope,
    ) -> Result<(String, ResolutionTraceEntry)> {
        let sessions = bounded(
            self.config.fetch_timeout(),
            "session search",
            self.store.search_sessions(&tag.identifier, scope),
        )
        .await?;

        if sessions.is_empty() {
            return Err(ReferenceError::NotFound(tag.identifier.clone()));
        }

        let shown: Vec<String> = sessions
            .into_iter()
            .take(self.config.top_k)
            .map(|s| format!("[{}] {}", s.title, s.summary))
            .collect();
        let count = shown.len();

        let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
            .with_result_count(count);
        Ok((shown.join("\n"), entry))
    }

    async fn resolve_shorthand(
        &self,
        tag: &ReferenceTag,
        scope: &Scope,
    ) -> Result<(String, ResolutionTraceEntry)> {
        let (category, index) = tag
            .shorthand_parts()
            .ok_or_else(|| ReferenceError::UnknownTag(tag.identifier.clone()))?;

        let notes = bounded(
            self.config.fetch_timeout(),
            "category lookup",
            self.store.search_notes(category, scope),
        )
        .await?;

        let note = notes
            .into_iter()
            .nth(index - 1)
            .ok_or_else(|| ReferenceError::NotFound(tag.identifier.clone()))?;

        let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
            .with_result_count(1)
            .with_preview(truncate_chars(&note.content, self.config.preview_chars));
        Ok((note.content, entry))
    }

    /// The adaptive file path: inline small content, summarize large
    /// content without a query, retrieve fragments otherwise.
    async fn resolve_file(
        &self,
        tag: &ReferenceTag,
        scope: &Scope,
        caller_query: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(String, ResolutionTraceEntry)> {
        let cfg = &self.config;

        let record = bounded(
            cfg.fetch_timeout(),
            "content fetch",
            self.locator.locate(scope, &tag.identifier),
        )
        .await?
        .ok_or_else(|| ReferenceError::NotFound(tag.identifier.clone()))?;

        if record.is_blank() {
            return Err(ReferenceError::EmptyContent(tag.identifier.clone()));
        }

        let effective_query = tag
            .query_hint
            .as_deref()
            .or(caller_query)
            .map(str::trim)
            .filter(|q| !q.is_empty());
        let entry = ResolutionTraceEntry::new(tag.kind.source(), &tag.identifier)
            .with_query(effective_query);

        if record.size_bytes <= cfg.inline_threshold_bytes {
            debug!("Inlining {} ({} bytes)", record.name, record.size_bytes);
            let preview = truncate_chars(record.text(), cfg.preview_chars);
            return Ok((
                record.text().to_string(),
                entry.with_result_count(1).with_preview(preview),
            ));
        }

        let Some(query) = effective_query else {
            // Large document, no intent: a structural summary avoids the
            // embedding cost entirely.
            let summary = structural_summary(&record, cfg.summary_head_lines);
            return Ok((summary, entry.with_result_count(1)));
        };

        if !self.gateway.is_available() {
            // Statically disabled gateway: keyword-window extraction.
            let windows = keyword_windows(record.text(), query, cfg);
            if windows.is_empty() {
                let summary = structural_summary(&record, cfg.summary_head_lines);
                return Ok((
                    summary,
                    entry
                        .with_result_count(1)
                        .with_error("embedding gateway disabled, no keyword matches"),
                ));
            }
            let count = windows.len();
            let block = format_keyword_block(&record.name, &windows, cfg.excerpt_chars);
            return Ok((block, entry.with_result_count(count)));
        }

        let mut fragments =
            splitter::split_into_fragments(&record.source_id, record.text(), cfg.chunk_size);

        let query_vec = match bounded(cfg.embed_timeout(), "query embedding", async {
            self.gateway
                .embed(EmbeddingRequest::new(query))
                .await
                .map_err(ReferenceError::from)
        })
        .await
        {
            Ok(response) => response.embedding,
            Err(e) => {
                warn!("Query embedding unavailable, returning leading fragments: {e}");
                let (block, count) = leading_fragments_block(&record.name, &fragments, cfg);
                return Ok((
                    block,
                    entry
                        .with_result_count(count)
                        .with_error(format!("embedding unavailable: {e}")),
                ));
            }
        };

        let scope_key = scope.key();

        // Reuse pre-indexed vectors when this source was seen before.
        let hits = self
            .index
            .search(&query_vec, &scope_key, &record.source_id, cfg.top_k)
            .await;
        if !hits.is_empty() {
            let selected: Vec<(f32, String)> =
                hits.into_iter().map(|h| (h.score, h.text)).collect();
            let count = selected.len();
            let block = format_retrieval_block(&record.name, &selected, cfg.excerpt_chars);
            return Ok((block, entry.with_result_count(count)));
        }

        // No pre-index: embed fragment by fragment, honoring cancellation
        // between fragments. A failed fragment is skipped, not fatal.
        for fragment in &mut fragments {
            if cancel.is_cancelled() {
                warn!(
                    "Resolution cancelled while embedding fragments of {}",
                    record.name
                );
                break;
            }
            match bounded(cfg.embed_timeout(), "fragment embedding", async {
                self.gateway
                    .embed(EmbeddingRequest::new(&fragment.text))
                    .await
                    .map_err(ReferenceError::from)
            })
            .await
            {
                Ok(response) => fragment.embedding = Some(response.embedding),
                Err(e) => warn!(
                    "Skipping fragment {} of {}: {e}",
                    fragment.ordinal, record.name
                ),
            }
        }

        let embedded: Vec<(usize, Embedding)> = fragments
            .iter()
            .filter_map(|f| f.embedding.as_ref().map(|v| (f.ordinal, v.clone())))
            .collect();

        if embedded.is_empty() {
            let (block, count) = leading_fragments_block(&record.name, &fragments, cfg);
            return Ok((
                block,
                entry
                    .with_result_count(count)
                    .with_error("no fragment embeddings available"),
            ));
        }

        let ranked = match rank_top_k(&query_vec, &embedded, cfg.top_k) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Ranking failed, returning leading fragments: {e}");
                let (block, count) = leading_fragments_block(&record.name, &fragments, cfg);
                return Ok((
                    block,
                    entry
                        .with_result_count(count)
                        .with_error(format!("ranking failed: {e}")),
                ));
            }
        };

        // Best-effort persistence for future queries on the same source.
        self.index.index_fragments(&scope_key, &fragments).await;

        let by_ordinal: HashMap<usize, &str> = fragments
            .iter()
            .map(|f| (f.ordinal, f.text.as_str()))
            .collect();
        let selected: Vec<(f32, String)> = ranked
            .iter()
            .filter_map(|r| by_ordinal.get(&r.ordinal).map(|t| (r.score, (*t).to_string())))
            .collect();
        let count = selected.len();
        let block = format_retrieval_block(&record.name, &selected, cfg.excerpt_chars);
        Ok((block, entry.with_result_count(count)))
    }
}

/// Apply `duration` as a deadline; elapsing is an ordinary failure.
async fn bounded<T, F>(duration: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ReferenceError::Timeout(what.to_string())),
    }
}

/// The placeholder spliced in for a failed resolution.
fn marker_for(tag: &ReferenceTag, error: &ReferenceError) -> String {
    let label = tag.kind.label();
    match error {
        ReferenceError::NotFound(id) => format!("[{label} not found: {id}]"),
        ReferenceError::EmptyContent(id) => format!("[File content unavailable: {id}]"),
        ReferenceError::UnknownTag(id) => format!("[Unknown reference: {id}]"),
        _ => format!("[{label} error: {}]", tag.identifier),
    }
}

/// Render a `@time[...]` spec. An invalid custom format degrades to the
/// full timestamp rendering instead of panicking inside the formatter.
fn render_time(spec: &str) -> String {
    let fmt = match spec {
        "now" | "" => DATETIME_FMT,
        "date" => "%Y-%m-%d",
        "time" => "%H:%M:%S",
        custom => {
            if StrftimeItems::new(custom).any(|item| matches!(item, Item::Error)) {
                DATETIME_FMT
            } else {
                custom
            }
        }
    };
    Local::now().format(fmt).to_string()
}

/// Truncate to `max_chars`, appending `…` when anything was cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut result = String::new();
    for (i, c) in text.chars().enumerate() {
        if i >= max_chars {
            result.push('…');
            return result;
        }
        result.push(c);
    }
    result
}

/// Line/char counts plus the leading lines of a large document.
fn structural_summary(record: &ContentRecord, head_lines: usize) -> String {
    let text = record.text();
    let line_count = text.lines().count();
    let char_count = text.chars().count();
    let head: Vec<&str> = text.lines().take(head_lines).collect();
    format!(
        "[File {} — {line_count} lines, {char_count} chars]\n{}\n…",
        record.name,
        head.join("\n")
    )
}

/// Ranked excerpts with similarity percentages.
fn format_retrieval_block(name: &str, selected: &[(f32, String)], excerpt_chars: usize) -> String {
    let mut block = format!("[File {name} — most relevant excerpts]");
    for (rank, (score, text)) in selected.iter().enumerate() {
        let pct = (score.clamp(0.0, 1.0) * 100.0).round() as u32;
        block.push_str(&format!(
            "\n#{} ({pct}% match)\n{}",
            rank + 1,
            truncate_chars(text, excerpt_chars)
        ));
    }
    block
}

/// First fragments in document order, used when embeddings are out.
fn leading_fragments_block(
    name: &str,
    fragments: &[Fragment],
    cfg: &ResolverConfig,
) -> (String, usize) {
    let take = cfg.top_k.min(fragments.len());
    let mut block = format!("[File {name} — excerpts]");
    for (i, fragment) in fragments.iter().take(take).enumerate() {
        block.push_str(&format!(
            "\n#{}\n{}",
            i + 1,
            truncate_chars(&fragment.text, cfg.excerpt_chars)
        ));
    }
    (block, take)
}

/// Keyword-window excerpts for a statically disabled gateway.
fn format_keyword_block(name: &str, windows: &[String], excerpt_chars: usize) -> String {
    let mut block = format!("[File {name} — keyword matches]");
    for (i, window) in windows.iter().enumerate() {
        block.push_str(&format!(
            "\n#{} (keyword match)\n{}",
            i + 1,
            truncate_chars(window, excerpt_chars)
        ));
    }
    block
}

/// Case-insensitive occurrences of `query`, each with surrounding context.
fn keyword_windows(content: &str, query: &str, cfg: &ResolverConfig) -> Vec<String> {
    let content_chars: Vec<char> = content.chars().collect();
    let lowered: Vec<char> = content_chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();
    let needle: Vec<char> = query
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut pos = 0;
    while windows.len() < cfg.top_k && pos + needle.len() <= lowered.len() {
        let Some(rel) = lowered[pos..]
            .windows(needle.len())
            .position(|w| w == needle.as_slice())
        else {
            break;
        };
        let at = pos + rel;
        let start = at.saturating_sub(cfg.keyword_window_before);
        let end = (at + needle.len() + cfg.keyword_window_after).min(content_chars.len());
        windows.push(content_chars[start..end].iter().collect());
        pos = at + needle.len();
    }
    windows
}
