use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::constants;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One embedding per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow!("Embedding provider returned no vectors"))
    }
}

/// OpenAI embeddings API client.
pub struct Embedder {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl Embedder {
    pub fn new(api_key: &str, model: &str, endpoint: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: endpoint
                .unwrap_or(constants::OPENAI_EMBEDDINGS_URL)
                .to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for Embedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                encoding_format: "float",
            })
            .send()
            .await
            .context("Embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            bail!("Embedding API error ({}): {}", status, message);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        collect_embeddings(parsed, texts.len())
    }
}

fn collect_embeddings(mut response: EmbeddingResponse, expected: usize) -> Result<Vec<Embedding>> {
    if response.data.len() != expected {
        bail!(
            "Embedding API returned {} vectors for {} inputs",
            response.data.len(),
            expected
        );
    }

    response.data.sort_by_key(|d| d.index);

    response
        .data
        .into_iter()
        .map(|d| {
            if d.embedding.len() != constants::EMBEDDING_DIMENSIONS {
                bail!(
                    "Embedding has {} dimensions, expected {}",
                    d.embedding.len(),
                    constants::EMBEDDING_DIMENSIONS
                );
            }
            Ok(Embedding(d.embedding))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(index: usize, first: f32) -> EmbeddingData {
        let mut embedding = vec![0.0; constants::EMBEDDING_DIMENSIONS];
        embedding[0] = first;
        EmbeddingData { embedding, index }
    }

    #[test]
    fn test_embeddings_are_reordered_by_index() {
        let response = EmbeddingResponse {
            data: vec![data(1, 2.0), data(0, 1.0)],
        };
        let embeddings = collect_embeddings(response, 2).unwrap();
        assert_eq!(embeddings[0].0[0], 1.0);
        assert_eq!(embeddings[1].0[0], 2.0);
    }

    #[test]
    fn test_count_and_dimension_mismatches_fail() {
        let response = EmbeddingResponse {
            data: vec![data(0, 1.0)],
        };
        assert!(collect_embeddings(response, 2).is_err());

        let response = EmbeddingResponse {
            data: vec![EmbeddingData {
                embedding: vec![1.0; 8],
                index: 0,
            }],
        };
        assert!(collect_embeddings(response, 1).is_err());
    }

    #[test]
    fn test_request_shape() {
        let input = vec!["fn main() {}".to_string()];
        let body = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
            encoding_format: "float",
        })
        .unwrap();
        assert_eq!(body["model"], "text-embedding-3-small");
        assert_eq!(body["input"][0], "fn main() {}");
    }
}
