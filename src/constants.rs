/// Centralized constants for peyote
pub mod constants {
    /// Directory name for peyote metadata (hidden directory in the workspace root)
    pub const PEYOTE_DIR_NAME: &str = ".peyote";

    /// Database filename
    pub const DATABASE_FILENAME: &str = "peyote.db";

    /// Configuration filename
    pub const CONFIG_FILENAME: &str = "config.toml";

    /// Global config directory name (in user config directory)
    pub const GLOBAL_CONFIG_DIR_NAME: &str = "peyote";

    /// Name the MCP server reports to clients
    pub const MCP_SERVER_NAME: &str = "peyote-code-context";

    /// Dimensionality of every stored embedding (text-embedding-3-small)
    pub const EMBEDDING_DIMENSIONS: usize = 1536;

    pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

    pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

    /// Number of chunks returned by a similarity query when none is given
    pub const DEFAULT_MATCH_COUNT: i64 = 5;

    /// Minimum cosine similarity (exclusive) for a chunk to be returned
    pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.35;

    pub const DEFAULT_CHUNK_SIZE: usize = 1000;
    pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

    /// Chunks embedded and inserted per round trip
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

    /// Edge function invoked to send completion emails
    pub const DEFAULT_NOTIFY_FUNCTION: &str = "resend";

    /// File extensions picked up during ingestion
    pub const DEFAULT_FILE_EXTENSIONS: &[&str] = &[
        "py", "js", "ts", "md", "go", "rs", "java", "c", "cpp", "h", "hpp",
    ];

    /// Build/cache directories skipped during ingestion
    pub const IGNORED_DIRECTORIES: &[&str] =
        &[".git", "node_modules", "dist", "build", "__pycache__"];

    /// Lock files skipped during ingestion
    pub const IGNORED_FILES: &[&str] = &["package-lock.json", "yarn.lock"];

    /// Key-value prefix for job records (`ingestion:<jobId>`)
    pub const JOB_KEY_PREFIX: &str = "ingestion";

    /// Key-value prefix for per-user job lists (`user:<userId>:jobs`)
    pub const USER_KEY_PREFIX: &str = "user";
}
