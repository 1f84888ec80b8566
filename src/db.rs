use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{Arc, Once};
use tokio::sync::Mutex;
use zerocopy::IntoBytes;

use crate::constants::constants;
use crate::kv::KeyValueStore;

static REGISTER_VEC: Once = Once::new();

/// Largest `k` sqlite-vec accepts in a KNN query.
const KNN_MAX_K: i64 = 4096;

/// A chunk ready to be written, with its embedding.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub file_path: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// One row of a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMatch {
    pub id: i64,
    pub file_path: String,
    pub content: String,
    /// `1 - cosine_distance(query, embedding)`
    pub similarity: f64,
}

pub struct Database {
    conn: Connection,
}

/// The single connection shared by request handlers and ingestion tasks.
pub type SharedDatabase = Arc<Mutex<Database>>;

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open(path)?;

        // Use query_row for PRAGMA that returns results.
        let _journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::init(conn)
    }

    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    pub fn open_in_memory() -> Result<Self> {
        register_sqlite_vec();
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS code_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_code_chunks_file_path ON code_chunks(file_path);

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        // Vectors live in a vec0 table keyed by the chunk id, compared by cosine distance
        conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS code_chunks_vec USING vec0(
                rowid INTEGER PRIMARY KEY,
                embedding FLOAT[{}] distance_metric=cosine
                )",
                constants::EMBEDDING_DIMENSIONS
            ),
            [],
        )?;

        Ok(Self { conn })
    }

    /// Insert a batch of chunks; either every chunk lands or none does.
    pub fn insert_chunks(&mut self, chunks: &[NewChunk]) -> Result<usize> {
        for chunk in chunks {
            check_dimensions(&chunk.embedding)?;
        }

        let tx = self.conn.transaction()?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO code_chunks (file_path, content, metadata) VALUES (?1, ?2, ?3)",
                params![chunk.file_path, chunk.content, chunk.metadata.to_string()],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO code_chunks_vec (rowid, embedding) VALUES (?1, ?2)",
                params![id, chunk.embedding.as_bytes()],
            )?;
        }
        tx.commit()?;

        Ok(chunks.len())
    }

    /// Nearest stored chunks whose cosine similarity to `query_embedding`
    /// is strictly greater than `similarity_threshold`, most similar first,
    /// at most `match_count` of them.
    pub fn match_code_chunks(
        &self,
        query_embedding: &[f32],
        match_count: i64,
        similarity_threshold: f64,
    ) -> Result<Vec<ChunkMatch>> {
        check_dimensions(query_embedding)?;
        if match_count <= 0 {
            return Ok(Vec::new());
        }

        let sql = if match_count <= KNN_MAX_K {
            r#"
            WITH knn AS (
                SELECT rowid, distance
                FROM code_chunks_vec
                WHERE embedding MATCH ?1 AND k = ?2
            )
            SELECT c.id, c.file_path, c.content, 1.0 - knn.distance AS similarity
            FROM knn
            JOIN code_chunks c ON c.id = knn.rowid
            WHERE 1.0 - knn.distance > ?3
            ORDER BY knn.distance
            LIMIT ?2
            "#
        } else {
            // vec0 caps k, so larger limits scan every vector
            r#"
            SELECT id, file_path, content, similarity
            FROM (
                SELECT c.id, c.file_path, c.content,
                       1.0 - vec_distance_cosine(v.embedding, ?1) AS similarity
                FROM code_chunks_vec v
                JOIN code_chunks c ON c.id = v.rowid
            )
            WHERE similarity > ?3
            ORDER BY similarity DESC
            LIMIT ?2
            "#
        };

        let mut stmt = self.conn.prepare(sql)?;
        let results = stmt
            .query_map(
                params![query_embedding.as_bytes(), match_count, similarity_threshold],
                |row| {
                    Ok(ChunkMatch {
                        id: row.get(0)?,
                        file_path: row.get(1)?,
                        content: row.get(2)?,
                        similarity: row.get(3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(results)
    }

    pub fn chunk_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM code_chunks", [], |row| row.get(0))?)
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    fn put_all(&mut self, entries: &[(String, String)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn check_dimensions(embedding: &[f32]) -> Result<()> {
    if embedding.len() != constants::EMBEDDING_DIMENSIONS {
        bail!(
            "embedding has {} dimensions, expected {}",
            embedding.len(),
            constants::EMBEDDING_DIMENSIONS
        );
    }
    Ok(())
}

fn register_sqlite_vec() {
    REGISTER_VEC.call_once(|| unsafe {
        // Every connection opened after this point gets the vec0 module
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}
