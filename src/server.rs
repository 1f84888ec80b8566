//! HTTP API: job submission and listing for authenticated callers.

use anyhow::{Context as AnyhowContext, Result};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{bearer_token, AuthUser, Authenticator};
use crate::config::ServerConfig;
use crate::db::SharedDatabase;
use crate::error::ApiError;
use crate::git::is_github_repo_url;
use crate::ingest::IngestPipeline;
use crate::jobs::{self, IngestionJob};
use crate::protocol::{HealthResponse, IngestRequest, IngestResponse, JobsResponse};

struct ApiState {
    db: SharedDatabase,
    auth: Arc<dyn Authenticator>,
    /// When absent, jobs are only recorded.
    pipeline: Option<Arc<IngestPipeline>>,
}

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(
        config: ServerConfig,
        db: SharedDatabase,
        auth: Arc<dyn Authenticator>,
        pipeline: Option<Arc<IngestPipeline>>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(ApiState { db, auth, pipeline }),
        }
    }

    /// Build the axum router for the API.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/ingest", post(handle_ingest))
            .route("/jobs", get(handle_list_jobs))
            .route("/jobs/{id}", get(handle_get_job))
            .route("/health", get(handle_health))
            .with_state(Arc::clone(&self.state));

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router
    }

    /// Serve until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;

        info!("API server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down API server");
            })
            .await
            .context("API server failed")
    }
}

async fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    state
        .auth
        .authenticate(token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired token".to_string()))
}

async fn handle_ingest(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let user = authenticate(&state, &headers).await?;

    let request: IngestRequest = serde_json::from_str(&body).map_err(|_| {
        ApiError::InvalidRequest("Request body must be a JSON object with repoUrl".to_string())
    })?;
    let repo_url = request
        .repo_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("repoUrl is required".to_string()))?;
    if !is_github_repo_url(repo_url) {
        return Err(ApiError::InvalidRequest(
            "repoUrl must be a GitHub repository URL".to_string(),
        ));
    }

    let job = IngestionJob::new(&user.id, user.email.as_deref(), repo_url);
    jobs::record(&mut *state.db.lock().await, &job)?;
    info!("Recorded ingestion job {} for {}", job.id, job.repo_url);

    let message = match &state.pipeline {
        Some(pipeline) => {
            let pipeline = Arc::clone(pipeline);
            let job_id = job.id.clone();
            tokio::spawn(async move {
                if let Err(e) = pipeline.run_job(&job_id).await {
                    error!("Ingestion job {} could not be run: {:#}", job_id, e);
                }
            });
            "Repository ingestion started."
        }
        None => "Repository ingestion job recorded.",
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            success: true,
            job_id: job.id,
            message: message.to_string(),
            email: job.email,
        }),
    ))
}

async fn handle_list_jobs(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<JobsResponse>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let jobs = jobs::list_for_user(&*state.db.lock().await, &user.id)?;
    debug!("Listing {} jobs for user {}", jobs.len(), user.id);
    Ok(Json(JobsResponse { jobs }))
}

async fn handle_get_job(
    State(state): State<Arc<ApiState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<IngestionJob>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    jobs::get(&*state.db.lock().await, &job_id)?
        .filter(|job| job.user_id == user.id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}
