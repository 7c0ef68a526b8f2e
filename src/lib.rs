//! # StudyRAG — subject-filtered resource retrieval
//!
//! Indexes a corpus of study resources (videos, articles) by the meaning of
//! their descriptions, then answers "find resources about this topic within
//! this subject" queries. Subjects map to curriculum foundations; the
//! foundation filter is applied inside the vector search, before ranking.
//!
//! ## Architecture
//!
//! - **[`config`]** — JSON configuration with serde defaults and validation
//! - **[`category`]** — Subject → foundation map (Category Resolver)
//! - **[`records`]** — Resource record type, validation, corpus loading
//! - **[`embedder`]** — Text embedding: OpenAI-compatible HTTP, feature hashing, retry/timeout wrapper
//! - **[`db`]** — SQLite + sqlite-vec index store with an r2d2 pool
//! - **[`indexer`]** — Index Builder with differential rebuild and orphan pruning
//! - **[`finder`]** — Query Processor: resolve → embed → filtered search → dedup
//! - **[`app`]** — Process-wide shared state
//! - **[`mcp`]** — MCP server exposing the engine as tools (stdio transport via rmcp)
//! - **[`error`]** — Engine error taxonomy

pub mod app;
pub mod category;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod finder;
pub mod indexer;
pub mod mcp;
pub mod records;
