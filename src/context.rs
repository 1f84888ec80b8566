use crate::auth::{Authenticator, SupabaseAuth};
use crate::config::{Config, ConfigManager, Credentials};
use crate::db::{Database, SharedDatabase};
use crate::embedder::{Embedder, EmbeddingProvider};
use crate::ingest::IngestPipeline;
use crate::notifier::Notifier;
use crate::retrieval::Retriever;
use anyhow::{Context as AnyhowContext, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a command needs: configuration, secrets and the chunk store.
pub struct AppContext {
    pub workspace: PathBuf,
    pub config_manager: ConfigManager,
    pub credentials: Credentials,
    pub db: SharedDatabase,
}

impl AppContext {
    pub fn new(workspace: &Path) -> Result<Self> {
        let config_manager = ConfigManager::new(Some(workspace))?;
        Self::with_config(workspace, config_manager, Credentials::from_env())
    }

    pub fn with_config(
        workspace: &Path,
        config_manager: ConfigManager,
        credentials: Credentials,
    ) -> Result<Self> {
        let db_path = config_manager.database_path(workspace);
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("Using chunk database at {}", db_path.display());
        let db = Database::new(&db_path)
            .with_context(|| format!("Failed to initialize database at {}", db_path.display()))?;

        Ok(Self {
            workspace: workspace.to_path_buf(),
            config_manager,
            credentials,
            db: db.into_shared(),
        })
    }

    pub fn config(&self) -> &Config {
        self.config_manager.config()
    }

    pub fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let embedding = &self.config().embedding;
        Ok(Arc::new(Embedder::new(
            self.credentials.openai_api_key()?,
            &embedding.model,
            embedding.endpoint.as_deref(),
        )))
    }

    pub fn authenticator(&self) -> Result<Arc<dyn Authenticator>> {
        let (url, key) = self.credentials.supabase()?;
        Ok(Arc::new(SupabaseAuth::new(url, key)))
    }

    pub fn retriever(&self) -> Result<Retriever> {
        Ok(Retriever::new(
            Arc::clone(&self.db),
            self.embedder()?,
            &self.config().retrieval,
        ))
    }

    pub fn pipeline(&self) -> Result<IngestPipeline> {
        let config = self.config();
        let pipeline = IngestPipeline::new(config, Arc::clone(&self.db), self.embedder()?)?;
        if !config.notify.enabled {
            return Ok(pipeline);
        }

        match self.credentials.supabase() {
            Ok((url, key)) => Ok(pipeline.with_notifier(Notifier::new(
                url,
                key,
                &config.notify.function_name,
            ))),
            Err(e) => {
                warn!("Notifications disabled: {:#}", e);
                Ok(pipeline)
            }
        }
    }
}
