use crate::git::is_github_repo_url;
use crate::jobs::IngestionJob;
use crate::protocol::{ErrorBody, IngestRequest, IngestResponse, JobsResponse};
use anyhow::{bail, Context as AnyhowContext, Result};
use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

/// Client for a running peyote API, authenticated with a bearer token.
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Submit a repository for ingestion. The URL is checked before anything is sent.
    pub async fn submit(&self, repo_url: &str) -> Result<IngestResponse> {
        let repo_url = repo_url.trim();
        if !is_github_repo_url(repo_url) {
            bail!("Please enter a valid GitHub repository URL (https://github.com/<owner>/<repo>)");
        }

        debug!("Submitting {} to {}", repo_url, self.base_url);
        let response = self
            .http
            .post(format!("{}/ingest", self.base_url))
            .bearer_auth(&self.token)
            .json(&IngestRequest {
                repo_url: Some(repo_url.to_string()),
            })
            .send()
            .await
            .context("Failed to connect to server")?;

        parse(response).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<IngestionJob>> {
        let response = self
            .http
            .get(format!("{}/jobs", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("Failed to connect to server")?;

        let jobs: JobsResponse = parse(response).await?;
        Ok(jobs.jobs)
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        bail!("Server error ({}): {}", status, message);
    }
    serde_json::from_str(&body).context("Failed to parse response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_rejected_before_request() {
        // Nothing listens on port 9; a request attempt would fail differently.
        let client = ApiClient::new("http://127.0.0.1:9/", "token");
        let err = client.submit("https://example.com/o/r").await.unwrap_err();
        assert!(err.to_string().contains("valid GitHub repository URL"));
        assert_eq!(client.base_url, "http://127.0.0.1:9");
    }
}
