use anyhow::{anyhow, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::constants::constants;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Override the chunk database location
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: constants::DEFAULT_BIND_ADDR.to_string(),
            enable_cors: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub match_count: i64,
    pub similarity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_count: constants::DEFAULT_MATCH_COUNT,
            similarity_threshold: constants::DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Alternative OpenAI-compatible embeddings endpoint
    pub endpoint: Option<String>,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: constants::DEFAULT_EMBEDDING_MODEL.to_string(),
            endpoint: None,
            batch_size: constants::DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Run submitted jobs through the ingestion pipeline in the background
    pub process_jobs: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub include_extensions: Vec<String>,
    pub ignore_directories: Vec<String>,
    pub ignore_files: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            process_jobs: true,
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            chunk_overlap: constants::DEFAULT_CHUNK_OVERLAP,
            include_extensions: owned(constants::DEFAULT_FILE_EXTENSIONS),
            ignore_directories: owned(constants::IGNORED_DIRECTORIES),
            ignore_files: owned(constants::IGNORED_FILES),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    /// Email the submitter when a job finishes
    pub enabled: bool,
    pub function_name: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            function_name: constants::DEFAULT_NOTIFY_FUNCTION.to_string(),
        }
    }
}

/// Secrets for the managed services, read from the environment (and `.env`).
#[derive(Clone, Default)]
pub struct Credentials {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "<redacted>"))
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        // A missing .env file is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            supabase_url: read("SUPABASE_URL"),
            supabase_key: read("SUPABASE_SERVICE_KEY"),
            openai_api_key: read("OPENAI_API_KEY"),
        }
    }

    pub fn openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is missing from the environment"))
    }

    /// Supabase project URL (without trailing slash) and service key.
    pub fn supabase(&self) -> Result<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_key) {
            (Some(url), Some(key)) => Ok((url.trim_end_matches('/'), key.as_str())),
            _ => Err(anyhow!(
                "SUPABASE_URL or SUPABASE_SERVICE_KEY is missing from the environment"
            )),
        }
    }
}

pub struct ConfigManager {
    merged_config: Config,
    pub global_config_path: PathBuf,
    pub local_config_path: Option<PathBuf>,
}

const DEFAULT_CONFIG: &str = r#"# peyote configuration file

# Optional: Override the chunk database location
# database_path = "/var/lib/peyote/peyote.db"

# [server]
# bind_addr = "127.0.0.1:3000"
# enable_cors = true

# [retrieval]
# match_count = 5
# similarity_threshold = 0.35

# [embedding]
# model = "text-embedding-3-small"
# batch_size = 100

# [ingest]
# process_jobs = true
# chunk_size = 1000
# chunk_overlap = 100

# [notify]
# enabled = false
# function_name = "resend"
"#;

impl ConfigManager {
    pub fn new(workspace_path: Option<&Path>) -> Result<Self> {
        let global_config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join(constants::GLOBAL_CONFIG_DIR_NAME);

        fs::create_dir_all(&global_config_dir)?;
        let global_config_path = global_config_dir.join(constants::CONFIG_FILENAME);

        // Load or create global config
        let global_config = if global_config_path.exists() {
            load_config_table(&global_config_path)?
        } else {
            fs::write(&global_config_path, DEFAULT_CONFIG)?;
            Table::new()
        };

        let local_config_path = workspace_path.map(|workspace_path| {
            workspace_path
                .join(constants::PEYOTE_DIR_NAME)
                .join(constants::CONFIG_FILENAME)
        });
        let local_config = match &local_config_path {
            Some(path) if path.exists() => Some(load_config_table(path)?),
            _ => None,
        };

        let merged_config = merge(global_config, local_config)
            .try_into()
            .context("Invalid configuration")?;

        Ok(Self {
            merged_config,
            global_config_path,
            local_config_path,
        })
    }

    /// Build a manager around an already-assembled configuration.
    pub fn from_config(config: Config) -> Self {
        Self {
            merged_config: config,
            global_config_path: PathBuf::new(),
            local_config_path: None,
        }
    }

    pub fn database_path(&self, workspace_path: &Path) -> PathBuf {
        self.merged_config.database_path.clone().unwrap_or_else(|| {
            workspace_path
                .join(constants::PEYOTE_DIR_NAME)
                .join(constants::DATABASE_FILENAME)
        })
    }

    /// Get the merged configuration (local overrides global)
    pub fn config(&self) -> &Config {
        &self.merged_config
    }
}

fn load_config_table(path: &Path) -> Result<Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Key-by-key merge of the two files; local values win, nested tables merge.
fn merge(mut global: Table, local: Option<Table>) -> Table {
    if let Some(local) = local {
        merge_into(&mut global, local);
    }
    global
}

fn merge_into(base: &mut Table, overrides: Table) {
    for (key, value) in overrides {
        if let Value::Table(nested) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge_into(existing, nested);
                continue;
            }
            base.insert(key, Value::Table(nested));
        } else {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_retrieval_contract() {
        let config = Config::default();
        assert_eq!(config.retrieval.match_count, 5);
        assert!((config.retrieval.similarity_threshold - 0.35).abs() < f64::EPSILON);
        assert_eq!(config.ingest.chunk_size, 1000);
        assert_eq!(config.ingest.chunk_overlap, 100);
        assert_eq!(config.embedding.batch_size, 100);
        assert!(config.ingest.include_extensions.contains(&"rs".to_string()));
    }

    #[test]
    fn test_commented_default_file_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(config.database_path.is_none());
        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            match_count = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.match_count, 10);
        assert!((config.retrieval.similarity_threshold - 0.35).abs() < f64::EPSILON);
    }

    #[test]
    fn test_local_overrides_global() {
        let global: Table = toml::from_str(
            r#"
            database_path = "/tmp/global.db"
            [server]
            bind_addr = "0.0.0.0:8080"
            [retrieval]
            match_count = 3
            similarity_threshold = 0.5
            [notify]
            enabled = true
            "#,
        )
        .unwrap();
        let local: Table = toml::from_str(
            r#"
            [retrieval]
            match_count = 8
            "#,
        )
        .unwrap();

        let merged: Config = merge(global, Some(local)).try_into().unwrap();
        assert_eq!(merged.retrieval.match_count, 8);
        assert!((merged.retrieval.similarity_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(merged.database_path, Some(PathBuf::from("/tmp/global.db")));
        assert_eq!(merged.server.bind_addr, "0.0.0.0:8080");
        assert!(merged.notify.enabled);
        assert_eq!(merged.ingest.chunk_size, 1000);
    }

    #[test]
    fn test_global_only_config() {
        let global: Table = toml::from_str("[ingest]\nprocess_jobs = false\n").unwrap();
        let merged: Config = merge(global, None).try_into().unwrap();
        assert!(!merged.ingest.process_jobs);
        assert!(merged.server.enable_cors);
    }

    #[test]
    fn test_missing_credentials_are_reported() {
        let creds = Credentials::default();
        assert!(creds.openai_api_key().is_err());
        assert!(creds.supabase().is_err());

        let creds = Credentials {
            supabase_url: Some("https://project.supabase.co/".to_string()),
            supabase_key: Some("service".to_string()),
            openai_api_key: None,
        };
        let (url, key) = creds.supabase().unwrap();
        assert_eq!(url, "https://project.supabase.co");
        assert_eq!(key, "service");
        assert!(!format!("{:?}", creds).contains("service\""));
    }
}
