//! Embedding encoding and the two-stage cosine search used by the SQLite store.

use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;

pub const DEFAULT_QUERY_RESCORE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    /// How many coarse candidates are rescored at full precision per query.
    pub query_rescore: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            query_rescore: DEFAULT_QUERY_RESCORE,
        }
    }
}

pub fn encode_f32(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn decode_f32(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect(),
    )
}

/// Maps `[min, max]` linearly onto `[0, 255]`.
///
/// Returns `(codes, scale, offset)` with `value ≈ code * scale + offset`.
pub fn quantize_uint8(vector: &[f32]) -> (Vec<u8>, f32, f32) {
    let min_val = vector.iter().copied().fold(f32::INFINITY, f32::min);
    let max_val = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    if vector.is_empty() {
        return (Vec::new(), 0.0, 0.0);
    }

    let range = max_val - min_val;
    if range < 1e-9 {
        return (vec![0u8; vector.len()], 0.0, min_val);
    }

    let scale = range / 255.0;
    let codes = vector
        .iter()
        .map(|&value| ((value - min_val) / scale).round().clamp(0.0, 255.0) as u8)
        .collect();

    (codes, scale, min_val)
}

pub fn dequantize_uint8(codes: &[u8], scale: f32, offset: f32) -> Vec<f32> {
    codes.iter().map(|&code| code as f32 * scale + offset).collect()
}

/// `1 - cos(a, b)`; a zero vector is maximally uninformative at distance 1.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut left_norm = 0f32;
    let mut right_norm = 0f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    let denominator = left_norm.sqrt() * right_norm.sqrt();
    if denominator < 1e-12 {
        return 1.0;
    }
    1.0 - dot / denominator
}

/// Keeps the `limit` entries with the smallest distance, closest first.
pub fn closest<T>(mut scored: Vec<(T, f32)>, limit: usize) -> Vec<(T, f32)> {
    scored.sort_by(|left, right| left.1.total_cmp(&right.1));
    scored.truncate(limit);
    scored
}
