use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use peyote::auth::{AuthUser, Authenticator};
use peyote::config::{Config, ServerConfig};
use peyote::constants::constants::EMBEDDING_DIMENSIONS;
use peyote::db::{Database, NewChunk};
use peyote::embedder::{Embedding, EmbeddingProvider};
use peyote::ingest::IngestPipeline;
use peyote::server::ApiServer;

/// Deterministic pseudo-random vectors so failures reproduce.
fn vectors(seed: u64, count: usize) -> Vec<Vec<f32>> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
    };
    (0..count)
        .map(|_| (0..EMBEDDING_DIMENSIONS).map(|_| next()).collect())
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm = |v: &[f32]| v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    dot / (norm(a) * norm(b))
}

fn store_with(embeddings: &[Vec<f32>]) -> Database {
    let mut db = Database::open_in_memory().unwrap();
    let rows: Vec<NewChunk> = embeddings
        .iter()
        .enumerate()
        .map(|(i, e)| NewChunk {
            file_path: format!("/chunk/{}", i),
            content: format!("chunk {}", i),
            metadata: serde_json::json!({}),
            embedding: e.clone(),
        })
        .collect();
    db.insert_chunks(&rows).unwrap();
    db
}

/// Unit vector with the given cosine similarity to the first axis.
fn at_similarity(s: f32) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIMENSIONS];
    v[0] = s;
    v[1] = (1.0 - s * s).sqrt();
    v
}

#[test]
fn test_similarity_query_properties() {
    let stored = vectors(7, 40);
    let db = store_with(&stored);
    let queries = vectors(99, 5);

    for query in &queries {
        for (match_count, threshold) in [(5, 0.0), (10, -0.05), (3, 0.02), (40, -1.0)] {
            let rows = db.match_code_chunks(query, match_count, threshold).unwrap();

            assert!(rows.len() <= match_count as usize);
            assert!(rows.windows(2).all(|w| w[0].similarity >= w[1].similarity));
            for row in &rows {
                assert!(row.similarity > threshold);
                let index: usize = row.file_path.trim_start_matches("/chunk/").parse().unwrap();
                let expected = cosine_similarity(&stored[index], query);
                assert!(
                    (row.similarity - expected).abs() < 1e-4,
                    "similarity {} vs expected {}",
                    row.similarity,
                    expected
                );
            }
        }
    }
}

#[test]
fn test_query_returns_best_matches_first() {
    let stored = vectors(11, 25);
    let db = store_with(&stored);
    let query = &stored[13];

    let rows = db.match_code_chunks(query, 1, 0.35).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].file_path, "/chunk/13");
    assert!((rows[0].similarity - 1.0).abs() < 1e-4);
}

#[test]
fn test_threshold_cutoff_with_defaults() {
    let db = store_with(&[at_similarity(0.9), at_similarity(0.5), at_similarity(0.2)]);
    let rows = db.match_code_chunks(&at_similarity(1.0), 5, 0.35).unwrap();

    assert_eq!(rows.len(), 2);
    assert!((rows[0].similarity - 0.9).abs() < 1e-4);
    assert!((rows[1].similarity - 0.5).abs() < 1e-4);
}

#[test]
fn test_empty_store_is_not_an_error() {
    let db = Database::open_in_memory().unwrap();
    let rows = db.match_code_chunks(&at_similarity(1.0), 5, 0.35).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunks.db");
    {
        let mut db = Database::new(&path).unwrap();
        db.insert_chunks(&[NewChunk {
            file_path: "/src/lib.rs".to_string(),
            content: "pub fn answer() -> u32 { 42 }".to_string(),
            metadata: serde_json::json!({ "language": "rust" }),
            embedding: at_similarity(1.0),
        }])
        .unwrap();
    }

    let db = Database::new(&path).unwrap();
    assert_eq!(db.chunk_count().unwrap(), 1);
    let rows = db.match_code_chunks(&at_similarity(0.8), 5, 0.35).unwrap();
    assert_eq!(rows[0].file_path, "/src/lib.rs");
}

struct TokenAuth;

#[async_trait]
impl Authenticator for TokenAuth {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>> {
        Ok(token.strip_prefix("user-").map(|id| AuthUser {
            id: id.to_string(),
            email: Some(format!("{}@example.com", id)),
        }))
    }
}

struct AxisEmbedder;

#[async_trait]
impl EmbeddingProvider for AxisEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|_| Embedding(at_similarity(1.0))).collect())
    }
}

fn get_jobs(token: &str) -> Request<Body> {
    Request::builder()
        .uri("/jobs")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_jobs_are_scoped_to_their_submitter() {
    let db = Database::open_in_memory().unwrap().into_shared();
    let server = ApiServer::new(
        ServerConfig::default(),
        Arc::clone(&db),
        Arc::new(TokenAuth),
        None,
    );

    for (token, repo) in [
        ("user-alice", "https://github.com/alice/one"),
        ("user-alice", "https://github.com/alice/two"),
        ("user-bob", "https://github.com/bob/three"),
    ] {
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/ingest")
                    .header("authorization", format!("Bearer {}", token))
                    .header("content-type", "application/json")
                    .body(Body::from(format!(r#"{{"repoUrl":"{}"}}"#, repo)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let alice = body_json(server.router().oneshot(get_jobs("user-alice")).await.unwrap()).await;
    let repos: Vec<&str> = alice["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["repoUrl"].as_str().unwrap())
        .collect();
    assert_eq!(
        repos,
        vec!["https://github.com/alice/two", "https://github.com/alice/one"]
    );

    let bob = body_json(server.router().oneshot(get_jobs("user-bob")).await.unwrap()).await;
    assert_eq!(bob["jobs"].as_array().unwrap().len(), 1);

    let bob_job = bob["jobs"][0]["id"].as_str().unwrap().to_string();
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{}", bob_job))
                .header("authorization", "Bearer user-alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server.router().oneshot(get_jobs("nobody")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_local_ingest_then_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/lib.rs"),
        "pub fn parse(input: &str) -> Vec<&str> {\n    input.split(',').collect()\n}\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("yarn.lock"), "ignored").unwrap();

    let db = Database::open_in_memory().unwrap().into_shared();
    let pipeline =
        IngestPipeline::new(&Config::default(), Arc::clone(&db), Arc::new(AxisEmbedder)).unwrap();
    let summary = pipeline.ingest_local(dir.path()).await.unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.chunks, 1);

    let retriever = peyote::retrieval::Retriever::new(
        Arc::clone(&db),
        Arc::new(AxisEmbedder),
        &Config::default().retrieval,
    );
    let chunks = retriever.retrieve_context("parse(").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].file_path, "/src/lib.rs");
    assert!(chunks[0].content.starts_with("pub fn parse"));
}
