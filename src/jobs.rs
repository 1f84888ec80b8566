use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::constants;
use crate::kv::KeyValueStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A request to ingest one repository on behalf of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub id: String,
    pub user_id: String,
    pub email: Option<String>,
    pub repo_url: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub chunks_ingested: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionJob {
    pub fn new(user_id: &str, email: Option<&str>, repo_url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            email: email.map(str::to_string),
            repo_url: repo_url.to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            chunks_ingested: 0,
            error: None,
        }
    }

    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

pub fn job_key(job_id: &str) -> String {
    format!("{}:{}", constants::JOB_KEY_PREFIX, job_id)
}

pub fn user_jobs_key(user_id: &str) -> String {
    format!("{}:{}:jobs", constants::USER_KEY_PREFIX, user_id)
}

fn user_job_ids<S: KeyValueStore + ?Sized>(store: &S, user_id: &str) -> Result<Vec<String>> {
    match store.get(&user_jobs_key(user_id))? {
        Some(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt job list for user {}", user_id)),
        None => Ok(Vec::new()),
    }
}

/// Store a new job and append it to its owner's job list in one write.
pub fn record<S: KeyValueStore + ?Sized>(store: &mut S, job: &IngestionJob) -> Result<()> {
    let mut ids = user_job_ids(store, &job.user_id)?;
    if !ids.contains(&job.id) {
        ids.push(job.id.clone());
    }

    store.put_all(&[
        (job_key(&job.id), serde_json::to_string(job)?),
        (user_jobs_key(&job.user_id), serde_json::to_string(&ids)?),
    ])
}

/// Overwrite an existing job record (status, counters).
pub fn update<S: KeyValueStore + ?Sized>(store: &mut S, job: &IngestionJob) -> Result<()> {
    store.put_all(&[(job_key(&job.id), serde_json::to_string(job)?)])
}

pub fn get<S: KeyValueStore + ?Sized>(store: &S, job_id: &str) -> Result<Option<IngestionJob>> {
    store
        .get(&job_key(job_id))?
        .map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("Corrupt job record {}", job_id))
        })
        .transpose()
}

/// All jobs recorded for `user_id`, newest first.
pub fn list_for_user<S: KeyValueStore + ?Sized>(
    store: &S,
    user_id: &str,
) -> Result<Vec<IngestionJob>> {
    let mut jobs = Vec::new();
    for id in user_job_ids(store, user_id)?.iter().rev() {
        match get(store, id)? {
            Some(job) => jobs.push(job),
            None => warn!("Job {} listed for user {} has no record", id, user_id),
        }
    }
    Ok(jobs)
}
