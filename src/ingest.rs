//! Repository ingestion: clone, walk, chunk, embed and store.

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use indicatif::ProgressBar;
use log::{error, info, warn};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::chunker::{Chunker, CodeChunk};
use crate::config::Config;
use crate::db::{NewChunk, SharedDatabase};
use crate::embedder::EmbeddingProvider;
use crate::git::{self, RepoMetadata};
use crate::indexer::{self, Indexer};
use crate::jobs::{self, IngestionJob, JobStatus};
use crate::notifier::Notifier;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub chunks: usize,
}

pub struct IngestPipeline {
    db: SharedDatabase,
    embedder: Arc<dyn EmbeddingProvider>,
    indexer: Indexer,
    chunker: Chunker,
    batch_size: usize,
    notifier: Option<Notifier>,
    progress: Option<ProgressBar>,
}

impl IngestPipeline {
    pub fn new(
        config: &Config,
        db: SharedDatabase,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        Ok(Self {
            db,
            embedder,
            indexer: Indexer::new(&config.ingest),
            chunker: Chunker::new(config.ingest.chunk_size, config.ingest.chunk_overlap)?,
            batch_size: config.embedding.batch_size.max(1),
            notifier: None,
            progress: None,
        })
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Report chunk progress on `bar` (its length is set once chunks are known).
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Drive a recorded job to completion, keeping its ledger entry current.
    pub async fn run_job(&self, job_id: &str) -> Result<IngestionJob> {
        let mut job = {
            let db = self.db.lock().await;
            jobs::get(&*db, job_id)?.ok_or_else(|| anyhow!("No such job: {}", job_id))?
        };

        job.transition(JobStatus::Processing);
        jobs::update(&mut *self.db.lock().await, &job)?;

        let start = Instant::now();
        info!("Starting ingestion job {} for {}", job.id, job.repo_url);
        match self.ingest_repository(&job.repo_url).await {
            Ok(summary) => {
                info!(
                    "Ingestion complete in {:.2} seconds ({} files, {} chunks).",
                    start.elapsed().as_secs_f64(),
                    summary.files,
                    summary.chunks
                );
                job.chunks_ingested = summary.chunks;
                job.transition(JobStatus::Completed);
            }
            Err(e) => {
                error!("Error during ingestion of {}: {:#}", job.repo_url, e);
                job.error = Some(format!("{:#}", e));
                job.transition(JobStatus::Failed);
            }
        }
        jobs::update(&mut *self.db.lock().await, &job)?;

        if let Some(notifier) = &self.notifier {
            notifier.job_finished(&job).await;
        }
        Ok(job)
    }

    /// Clone `repo_url` into a temporary directory and ingest the checkout.
    pub async fn ingest_repository(&self, repo_url: &str) -> Result<IngestSummary> {
        let checkout = tempfile::tempdir().context("Failed to create temporary directory")?;
        let dest = checkout.path().to_path_buf();

        let url = repo_url.to_string();
        let mut metadata = tokio::task::spawn_blocking(move || -> Result<RepoMetadata> {
            git::clone_repo(&url, &dest)?;
            git::repo_metadata(&dest)
        })
        .await
        .context("Clone task panicked")??;
        metadata.repo_url = Some(repo_url.to_string());

        self.ingest_path(checkout.path(), metadata).await
    }

    /// Ingest a directory already on disk; git metadata is used when present.
    pub async fn ingest_local(&self, root: &Path) -> Result<IngestSummary> {
        let metadata = git::repo_metadata(root).unwrap_or_else(|e| {
            warn!("No git metadata for {}: {:#}", root.display(), e);
            RepoMetadata {
                repo_name: root
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                commit_hash: String::new(),
                repo_url: None,
            }
        });
        self.ingest_path(root, metadata).await
    }

    pub async fn ingest_path(&self, root: &Path, metadata: RepoMetadata) -> Result<IngestSummary> {
        info!("Processing repository: {}", metadata.repo_name);

        let indexer = self.indexer.clone();
        let chunker = self.chunker.clone();
        let root_owned = root.to_path_buf();
        let (files, chunks) =
            tokio::task::spawn_blocking(move || collect_chunks(&indexer, &chunker, &root_owned))
                .await
                .context("Chunking task panicked")??;

        if let Some(bar) = &self.progress {
            bar.set_length(chunks.len() as u64);
        }

        let mut stored = 0;
        for batch in chunks.chunks(self.batch_size) {
            stored += self.store_batch(batch, &metadata).await?;
            if let Some(bar) = &self.progress {
                bar.inc(batch.len() as u64);
            }
        }

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        Ok(IngestSummary {
            files,
            chunks: stored,
        })
    }

    async fn store_batch(&self, batch: &[CodeChunk], metadata: &RepoMetadata) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != batch.len() {
            bail!(
                "Got {} embeddings for a batch of {} chunks",
                embeddings.len(),
                batch.len()
            );
        }

        let rows: Vec<NewChunk> = batch
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| NewChunk {
                file_path: chunk.file_path.clone(),
                content: chunk.content.clone(),
                metadata: chunk_metadata(metadata, chunk),
                embedding: embedding.0,
            })
            .collect();

        let inserted = self.db.lock().await.insert_chunks(&rows)?;
        info!("  > Successfully ingested batch of {} chunks.", inserted);
        Ok(inserted)
    }
}

fn chunk_metadata(metadata: &RepoMetadata, chunk: &CodeChunk) -> serde_json::Value {
    json!({
        "repo_name": metadata.repo_name,
        "commit_hash": metadata.commit_hash,
        "repo_url": metadata.repo_url,
        "language": chunk.language,
    })
}

/// Walk `root` and split every readable candidate file. Unreadable files are
/// logged and skipped.
fn collect_chunks(
    indexer: &Indexer,
    chunker: &Chunker,
    root: &Path,
) -> Result<(usize, Vec<CodeChunk>)> {
    let files: Vec<PathBuf> = indexer.index_directory(root)?;
    let mut chunks = Vec::new();
    let mut processed = 0;

    for file in &files {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                warn!("Error processing file {}: {}", file.display(), e);
                continue;
            }
        };
        processed += 1;
        chunks.extend(chunker.chunk_file(&indexer::relative_path(root, file), &content));
    }

    Ok((processed, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::constants;
    use crate::db::Database;
    use crate::embedder::Embedding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds every text onto the same axis and counts calls.
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|_| {
                    let mut v = vec![0.0; constants::EMBEDDING_DIMENSIONS];
                    v[0] = 1.0;
                    Embedding(v)
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
            bail!("quota exceeded")
        }
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn one() -> u32 { 1 }\n").unwrap();
        std::fs::write(dir.path().join("src/two.py"), "def two():\n    return 2\n").unwrap();
        std::fs::write(dir.path().join("src/blob.rs"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not indexed").unwrap();
        dir
    }

    fn small_batches() -> Config {
        let mut config = Config::default();
        config.embedding.batch_size = 1;
        config
    }

    #[tokio::test]
    async fn test_ingest_local_stores_chunks_in_batches() {
        let dir = workspace();
        let db = Database::open_in_memory().unwrap().into_shared();
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let pipeline =
            IngestPipeline::new(&small_batches(), Arc::clone(&db), embedder.clone()).unwrap();

        let summary = pipeline.ingest_local(dir.path()).await.unwrap();
        assert_eq!(summary, IngestSummary { files: 2, chunks: 2 });
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(db.lock().await.chunk_count().unwrap(), 2);

        let mut query = vec![0.0; constants::EMBEDDING_DIMENSIONS];
        query[0] = 1.0;
        let rows = db.lock().await.match_code_chunks(&query, 5, 0.35).unwrap();
        let mut paths: Vec<&str> = rows.iter().map(|r| r.file_path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/src/lib.rs", "/src/two.py"]);
    }

    #[tokio::test]
    async fn test_run_job_records_failure() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let pipeline =
            IngestPipeline::new(&Config::default(), Arc::clone(&db), Arc::new(FailingEmbedder))
                .unwrap();

        let job = IngestionJob::new("u1", None, "file:///definitely/not/a/repo");
        jobs::record(&mut *db.lock().await, &job).unwrap();

        let finished = pipeline.run_job(&job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert!(finished.error.is_some());

        let stored = jobs::get(&*db.lock().await, &job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_job_unknown_id() {
        let db = Database::open_in_memory().unwrap().into_shared();
        let pipeline =
            IngestPipeline::new(&Config::default(), db, Arc::new(FailingEmbedder)).unwrap();
        assert!(pipeline.run_job("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_ingest() {
        let dir = workspace();
        let db = Database::open_in_memory().unwrap().into_shared();
        let pipeline =
            IngestPipeline::new(&Config::default(), Arc::clone(&db), Arc::new(FailingEmbedder))
                .unwrap();
        assert!(pipeline.ingest_local(dir.path()).await.is_err());
        assert_eq!(db.lock().await.chunk_count().unwrap(), 0);
    }
}
