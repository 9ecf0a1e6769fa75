// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, ChunkParams};
use crate::embedder::Embedder;
use crate::store::{StoredChunk, VectorStore};

/// What one sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Files (re-)chunked and embedded.
    pub indexed: usize,
    /// Files skipped because their content hash was unchanged.
    pub unchanged: usize,
    /// Previously tracked files no longer in the sync set.
    pub removed: usize,
}

/// Keeps the vector store in step with the memory documents on disk.
///
/// The indexer is the store's only writer.  Sync is idempotent: files are
/// re-embedded only when their SHA-256 changes, and files that vanish
/// from the sync set are dropped from the store.
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    params: ChunkParams,
    dirty: AtomicBool,
}

impl Indexer {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, params: ChunkParams) -> Self {
        Self {
            store,
            embedder,
            params,
            dirty: AtomicBool::new(false),
        }
    }

    /// Flag that the documents changed on disk; the next `sync_if_dirty`
    /// will do a full pass.  Called from the filesystem watcher.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Run `sync_files` when the dirty bit is set, clearing it first so a
    /// change arriving mid-sync re-arms the next pass.
    pub async fn sync_if_dirty(&self, paths: &[PathBuf]) -> anyhow::Result<Option<SyncStats>> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(Some(self.sync_files(paths).await?))
    }

    /// Bring the store in line with `paths`.
    ///
    /// Unreadable files are skipped with a warning and retried on the
    /// next pass; they never abort the sync.
    pub async fn sync_files(&self, paths: &[PathBuf]) -> anyhow::Result<SyncStats> {
        let mut stats = SyncStats::default();

        // Drop whatever is tracked but no longer present.
        let present: HashSet<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        for tracked in self.store.tracked_file_paths()? {
            if !present.contains(&tracked) {
                debug!(path = %tracked, "dropping removed file from index");
                self.store.delete_chunks_for_file(&tracked)?;
                self.store.delete_file_hash(&tracked)?;
                stats.removed += 1;
            }
        }

        for path in paths {
            let key = path.to_string_lossy().into_owned();
            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let hash = hex_digest(&bytes);
            if self.store.get_file_hash(&key)?.as_deref() == Some(hash.as_str()) {
                stats.unchanged += 1;
                continue;
            }

            self.store.delete_chunks_for_file(&key)?;

            let text = String::from_utf8_lossy(&bytes);
            let chunks = chunk_text(&text, &self.params);
            if !chunks.is_empty() {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let embeddings = self.embedder.embed(&texts).await?;
                for (i, (chunk, embedding)) in chunks.iter().zip(embeddings).enumerate() {
                    self.store.upsert_chunk(&StoredChunk {
                        id: format!("{key}:{i}"),
                        path: key.clone(),
                        text: chunk.text.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        embedding,
                    })?;
                }
            }

            let (mtime, size) = file_meta(path);
            self.store.set_file_hash(&key, &hash, mtime, size)?;
            stats.indexed += 1;
        }

        info!(
            indexed = stats.indexed,
            unchanged = stats.unchanged,
            removed = stats.removed,
            "memory sync complete"
        );
        Ok(stats)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn file_meta(path: &Path) -> (i64, u64) {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            (mtime, meta.len())
        }
        Err(_) => (0, 0),
    }
}

/// Recursively list the markdown documents under `dir`, sorted for
/// deterministic sync order.  Hidden directories are skipped.
pub fn collect_documents(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk(dir, &mut out);
    out.sort();
    out
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            walk(&path, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("md"))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
