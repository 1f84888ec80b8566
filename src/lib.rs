//! Code-context retrieval for completion.
//!
//! Repositories submitted through the HTTP API are cloned, split into chunks,
//! embedded and stored in SQLite with a sqlite-vec cosine index. The MCP
//! server answers completion clients with the chunks most similar to the code
//! being written.

pub mod auth;
pub mod chunker;
pub mod client;
pub mod config;
pub mod constants;
pub mod context;
pub mod db;
pub mod embedder;
pub mod error;
pub mod git;
pub mod indexer;
pub mod ingest;
pub mod jobs;
pub mod kv;
pub mod mcp;
pub mod notifier;
pub mod protocol;
pub mod retrieval;
pub mod server;
