//! # Reference Resolution
//!
//! This crate resolves inline `@` reference markers embedded in free text —
//! notes, files, sessions, users, timestamps — and splices the referenced
//! content into the text before it reaches prompt construction. Small
//! content is inlined whole; large content goes through semantic fragment
//! retrieval so only the most relevant excerpts are spliced in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Reference Resolution                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  PatternRegistry ──► ReferenceTag ──► ReferenceResolver         │
//! │                                            │                    │
//! │        ┌───────────────┬──────────────────┤                     │
//! │        ▼               ▼                  ▼                     │
//! │  ContentLocator  FragmentSplitter   FragmentIndex               │
//! │        │               │                  │                     │
//! │        ▼               ▼                  ▼                     │
//! │  ContentStore    EmbeddingGateway   VectorStore                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure — missing content, a down embedding gateway, a vector
//! backend timeout — degrades to a readable bracketed placeholder in the
//! output plus a [`ResolutionTrace`] entry; `resolve()` never fails.

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod locator;
pub mod registry;
pub mod resolver;
pub mod splitter;
pub mod trace;

pub use cache::{CachedResolution, ResolutionCache};
pub use config::{CacheConfig, ResolverConfig};
pub use error::{ReferenceError, Result};
pub use index::{FragmentIndex, ScoredHit, SourceFilter, VectorPoint, VectorStore};
pub use locator::{
    ContentLocator, ContentRecord, ContentStore, NoteRecord, Scope, SessionRecord, SourceKind,
    StoredFile,
};
pub use registry::{PatternRegistry, ReferenceTag, TagKind};
pub use resolver::{ReferenceResolver, Resolution};
pub use splitter::{Fragment, split, split_into_fragments};
pub use trace::{ResolutionTrace, ResolutionTraceEntry};
