//! The shared vector index: embedding, storage, cosine search, and
//! text chunking for ingestion.
//!
//! The embedding dimension is fixed at construction. Reads run
//! concurrently; writes are serialized by the index lock.

use std::sync::Arc;

use parking_lot::RwLock;

use ens_domain::error::Result;
use ens_domain::state::Evidence;

// ── Embedding ────────────────────────────────────────────────────────

/// Turns text into a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic bag-of-words hashing embedder.
///
/// Tokens are lowercased alphanumeric runs, hashed into `dim` buckets,
/// and the resulting vector is L2-normalized. Deterministic across
/// processes, which keeps index behavior reproducible under replay.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

fn token_bucket(token: &str, dim: usize) -> usize {
    let h = token
        .bytes()
        .fold(1469598103934665603u64, |h, b| {
            (h ^ b as u64).wrapping_mul(1099511628211)
        });
    (h % dim as u64) as usize
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            vec[token_bucket(&token, self.dim)] += 1.0;
        }
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

// ── Index ────────────────────────────────────────────────────────────

/// Vector-index operations the engines consume.
pub trait VectorIndex: Send + Sync {
    fn add(&self, chunks: Vec<Evidence>) -> Result<()>;
    /// Top-`k` chunks by similarity, most similar first. Ties keep
    /// insertion order.
    fn search(&self, query: &str, k: usize) -> Result<Vec<Evidence>>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct IndexEntry {
    vector: Vec<f32>,
    evidence: Evidence,
}

/// In-memory cosine index over a pluggable embedder.
pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self::new(Arc::new(HashEmbedder::new(dim)))
    }
}

impl VectorIndex for InMemoryIndex {
    fn add(&self, chunks: Vec<Evidence>) -> Result<()> {
        let mut entries = self.entries.write();
        for evidence in chunks {
            let vector = self.embedder.embed(&evidence.text);
            entries.push(IndexEntry { vector, evidence });
        }
        Ok(())
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<Evidence>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query);
        let entries = self.entries.read();

        let mut scored: Vec<(f32, usize)> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let dot = entry
                    .vector
                    .iter()
                    .zip(query_vec.iter())
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (dot, i)
            })
            .collect();
        // Stable top-k: score descending, insertion order for ties.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, i)| entries[i].evidence.clone())
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

// ── Chunking ─────────────────────────────────────────────────────────

/// Split text into overlapping chunks for ingestion.
///
/// Character-based windows of `chunk_size` advancing by
/// `chunk_size - overlap`; blank chunks are dropped.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut chunks = Vec::new();
    let mut i = 0usize;
    while i < n {
        let end = (i + chunk_size).min(n);
        let chunk: String = chars[i..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_owned());
        }
        if end == n {
            break;
        }
        i = end.saturating_sub(overlap).max(i + 1);
    }
    chunks
}
