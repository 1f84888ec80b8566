use anyhow::{Context as AnyhowContext, Result};
use log::debug;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::db::{ChunkMatch, SharedDatabase};
use crate::embedder::{Embedding, EmbeddingProvider};

/// Chunks with more `0x` literals than this are candidates for the data filter.
const HEX_LITERAL_LIMIT: usize = 10;
/// Hex literals per 100 characters above which a chunk is treated as a data table.
const HEX_DENSITY_LIMIT: f64 = 0.2;

/// Finds stored code relevant to a snippet.
pub struct Retriever {
    db: SharedDatabase,
    embedder: Arc<dyn EmbeddingProvider>,
    match_count: i64,
    similarity_threshold: f64,
}

impl Retriever {
    pub fn new(
        db: SharedDatabase,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            match_count: config.match_count,
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// Embed `code_snippet`, run the similarity query and drop data-heavy chunks.
    pub async fn retrieve_context(&self, code_snippet: &str) -> Result<Vec<ChunkMatch>> {
        let Embedding(query) = self
            .embedder
            .embed_query(code_snippet)
            .await
            .context("Failed to embed code snippet")?;

        let matches = self
            .db
            .lock()
            .await
            .match_code_chunks(&query, self.match_count, self.similarity_threshold)?;

        let total = matches.len();
        let kept: Vec<ChunkMatch> = matches
            .into_iter()
            .filter(|m| !looks_like_data(&m.content))
            .collect();
        debug!("Retrieved {} chunks, kept {}", total, kept.len());
        Ok(kept)
    }
}

/// Byte tables and firmware blobs embed well but make useless context.
pub fn looks_like_data(content: &str) -> bool {
    let hex_literals = content.matches("0x").count();
    if hex_literals <= HEX_LITERAL_LIMIT || content.is_empty() {
        return false;
    }
    let per_hundred_chars = hex_literals as f64 / (content.chars().count() as f64 / 100.0);
    per_hundred_chars > HEX_DENSITY_LIMIT
}

/// Markdown listing of retrieved chunks for the `get_code_context` tool.
pub fn format_context(chunks: &[ChunkMatch]) -> String {
    if chunks.is_empty() {
        return "No relevant code context found.".to_string();
    }

    let mut out = String::from("# Retrieved Code Context\n\n");
    for (i, chunk) in chunks.iter().enumerate() {
        let _ = write!(
            out,
            "## Context {}\n**File:** {}\n**Similarity:** {:.4}\n\n```\n{}\n```\n\n",
            i + 1,
            chunk.file_path,
            chunk.similarity,
            chunk.content
        );
    }
    out
}

/// Completion prompt combining the user's code with retrieved context.
pub fn construct_augmented_prompt(original_code: &str, chunks: &[ChunkMatch]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n");

    format!(
        "You are an expert AI programming assistant.
A user is writing the following code and needs a completion.

<USER_CODE>
{original_code}
</USER_CODE>

To help you, here is some additional relevant context from other files in the user's repository:

<CONTEXT>
{context}
</CONTEXT>

Based on the user's code and the provided context, complete the user's code.
Only provide the code completion itself, without any introductory text.
"
    )
}
