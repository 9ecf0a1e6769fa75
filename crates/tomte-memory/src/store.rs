// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};

/// A chunk as persisted in the store.  `id` is `<path>:<index>`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub path: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub embedding: Vec<f32>,
}

/// Per-file sync record.  A file has a record iff it was successfully
/// indexed; `content_hash` is the SHA-256 of its bytes at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub mtime: i64,
    pub size: u64,
}

/// One vector-search hit.  `distance` is cosine distance in `[0, 2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub path: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub distance: f32,
}

/// One keyword-search hit.  `rank` is the raw BM25 value: more negative
/// means a better match.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub id: String,
    pub path: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub rank: f64,
}

/// Storage contract the indexer and searcher are written against.
///
/// Raw scores (distances, BM25 ranks) never leave the search layer;
/// hybrid search normalizes both sides before anything user-visible.
pub trait VectorStore: Send + Sync {
    fn upsert_chunk(&self, chunk: &StoredChunk) -> anyhow::Result<()>;
    fn delete_chunks_for_file(&self, path: &str) -> anyhow::Result<()>;
    fn search_vector(&self, embedding: &[f32], k: usize) -> anyhow::Result<Vec<VectorHit>>;
    fn search_keyword(&self, query: &str, k: usize) -> anyhow::Result<Vec<KeywordHit>>;
    fn get_file_hash(&self, path: &str) -> anyhow::Result<Option<String>>;
    fn set_file_hash(&self, path: &str, hash: &str, mtime: i64, size: u64) -> anyhow::Result<()>;
    fn delete_file_hash(&self, path: &str) -> anyhow::Result<()>;
    fn tracked_file_paths(&self) -> anyhow::Result<Vec<String>>;
}

// ─── SQLite implementation ────────────────────────────────────────────────────

/// SQLite-backed store: a `chunks` table with the embeddings as little-
/// endian f32 blobs, a `files` hash table, and an FTS5 shadow table for
/// BM25.  Vector search scans the embeddings in process.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening vector store {}", path.display()))?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory().context("opening in-memory store")?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                 id         TEXT PRIMARY KEY,
                 path       TEXT NOT NULL,
                 text       TEXT NOT NULL,
                 start_line INTEGER NOT NULL,
                 end_line   INTEGER NOT NULL,
                 embedding  BLOB NOT NULL
             );
             CREATE INDEX IF NOT EXISTS chunks_by_path ON chunks(path);
             CREATE TABLE IF NOT EXISTS files (
                 path         TEXT PRIMARY KEY,
                 content_hash TEXT NOT NULL,
                 mtime        INTEGER NOT NULL,
                 size         INTEGER NOT NULL
             );
             CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
                 USING fts5(id UNINDEXED, text);",
        )
        .context("creating vector store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine distance in `[0, 2]`; orthogonal or zero vectors score 1.0.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

/// Reduce a free-text query to an FTS5 `OR` expression.
///
/// FTS5 treats punctuation as syntax, so only alphanumeric terms are
/// kept.  Returns `None` when nothing queryable remains.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert_chunk(&self, chunk: &StoredChunk) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO chunks (id, path, text, start_line, end_line, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 path = excluded.path,
                 text = excluded.text,
                 start_line = excluded.start_line,
                 end_line = excluded.end_line,
                 embedding = excluded.embedding",
            params![
                chunk.id,
                chunk.path,
                chunk.text,
                chunk.start_line as i64,
                chunk.end_line as i64,
                embedding_to_blob(&chunk.embedding),
            ],
        )
        .context("upserting chunk")?;
        conn.execute("DELETE FROM chunks_fts WHERE id = ?1", params![chunk.id])
            .context("clearing stale fts row")?;
        conn.execute(
            "INSERT INTO chunks_fts (id, text) VALUES (?1, ?2)",
            params![chunk.id, chunk.text],
        )
        .context("inserting fts row")?;
        Ok(())
    }

    fn delete_chunks_for_file(&self, path: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM chunks_fts WHERE id IN (SELECT id FROM chunks WHERE path = ?1)",
            params![path],
        )
        .context("deleting fts rows")?;
        conn.execute("DELETE FROM chunks WHERE path = ?1", params![path])
            .context("deleting chunks")?;
        Ok(())
    }

    fn search_vector(&self, embedding: &[f32], k: usize) -> anyhow::Result<Vec<VectorHit>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, path, text, start_line, end_line, embedding FROM chunks")
            .context("preparing vector scan")?;
        let mut hits: Vec<VectorHit> = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(5)?;
                Ok(VectorHit {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    text: row.get(2)?,
                    start_line: row.get::<_, i64>(3)? as usize,
                    end_line: row.get::<_, i64>(4)? as usize,
                    distance: cosine_distance(embedding, &blob_to_embedding(&blob)),
                })
            })
            .context("scanning chunks")?
            .collect::<Result<_, _>>()
            .context("reading chunk rows")?;

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn search_keyword(&self, query: &str, k: usize) -> anyhow::Result<Vec<KeywordHit>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT chunks_fts.id, c.path, c.text, c.start_line, c.end_line,
                        bm25(chunks_fts)
                 FROM chunks_fts
                 JOIN chunks c ON c.id = chunks_fts.id
                 WHERE chunks_fts MATCH ?1
                 ORDER BY bm25(chunks_fts)
                 LIMIT ?2",
            )
            .context("preparing keyword search")?;
        let hits = stmt
            .query_map(params![match_expr, k as i64], |row| {
                Ok(KeywordHit {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    text: row.get(2)?,
                    start_line: row.get::<_, i64>(3)? as usize,
                    end_line: row.get::<_, i64>(4)? as usize,
                    rank: row.get(5)?,
                })
            })
            .context("running keyword search")?
            .collect::<Result<_, _>>()
            .context("reading keyword rows")?;
        Ok(hits)
    }

    fn get_file_hash(&self, path: &str) -> anyhow::Result<Option<String>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT content_hash FROM files WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .context("reading file hash")
    }

    fn set_file_hash(&self, path: &str, hash: &str, mtime: i64, size: u64) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO files (path, content_hash, mtime, size)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 mtime = excluded.mtime,
                 size = excluded.size",
            params![path, hash, mtime, size as i64],
        )
        .context("writing file hash")?;
        Ok(())
    }

    fn delete_file_hash(&self, path: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM files WHERE path = ?1", params![path])
            .context("deleting file hash")?;
        Ok(())
    }

    fn tracked_file_paths(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT path FROM files ORDER BY path")
            .context("preparing tracked-paths query")?;
        let paths = stmt
            .query_map([], |row| row.get(0))
            .context("listing tracked paths")?
            .collect::<Result<_, _>>()
            .context("reading tracked paths")?;
        Ok(paths)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
