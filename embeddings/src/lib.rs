//! # Embeddings
//!
//! This crate provides embedding generation and similarity ranking for the
//! Muse reference-retrieval system.
//!
//! ## Features
//!
//! - **Embedding Gateway**: Convert text to dense vectors via a remote model
//! - **Similarity Ranking**: Score document fragments against a query vector
//! - **Availability Probing**: Callers can detect a statically disabled
//!   gateway and route around it before paying any network cost
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Embeddings System                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingGateway ──► Embedding ──► SimilarityRanker            │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  OpenAI-compatible API             ranked fragment ordinals     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod gateway;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use gateway::{EmbeddingGateway, EmbeddingRequest, EmbeddingResponse, OpenAIGateway};
pub use similarity::{RankedFragment, cosine_similarity, rank_top_k};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings (varies by model).
pub const DEFAULT_DIMENSION: usize = 1536; // OpenAI text-embedding-3-small
