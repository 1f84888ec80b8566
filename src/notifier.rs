use anyhow::{bail, Context as AnyhowContext, Result};
use log::{info, warn};
use reqwest::Client;
use serde::Serialize;

use crate::jobs::{IngestionJob, JobStatus};

#[derive(Debug, Serialize, PartialEq)]
struct CompletionPayload<'a> {
    email: &'a str,
    repo_url: &'a str,
    status: &'static str,
    error_message: Option<&'a str>,
}

/// Sends the "ingestion finished" email through a Supabase edge function.
pub struct Notifier {
    client: Client,
    function_url: String,
    api_key: String,
}

impl Notifier {
    pub fn new(supabase_url: &str, api_key: &str, function_name: &str) -> Self {
        Self {
            client: Client::new(),
            function_url: format!(
                "{}/functions/v1/{}",
                supabase_url.trim_end_matches('/'),
                function_name
            ),
            api_key: api_key.to_string(),
        }
    }

    /// Best effort: failures are logged, never returned.
    pub async fn job_finished(&self, job: &IngestionJob) {
        let Some(email) = job.email.as_deref() else {
            return;
        };
        let Some(payload) = completion_payload(job, email) else {
            return;
        };

        match self.send(&payload).await {
            Ok(()) => info!("Email notification sent to {} - Status: {}", email, payload.status),
            Err(e) => warn!("Error sending email notification: {:#}", e),
        }
    }

    async fn send(&self, payload: &CompletionPayload<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.function_url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .context("Notification request failed")?;
        if !response.status().is_success() {
            bail!("Notification function returned {}", response.status());
        }
        Ok(())
    }
}

fn completion_payload<'a>(job: &'a IngestionJob, email: &'a str) -> Option<CompletionPayload<'a>> {
    let status = match job.status {
        JobStatus::Completed => "success",
        JobStatus::Failed => "failed",
        JobStatus::Pending | JobStatus::Processing => return None,
    };
    Some(CompletionPayload {
        email,
        repo_url: &job.repo_url,
        status,
        error_message: job.error.as_deref(),
    })
}
