//! Deterministic offline embeddings.
//!
//! The vector is derived from an FNV-1a hash of the text expanded with a
//! splitmix64 sequence. Identical text always yields the identical vector,
//! which is enough for wiring tests and air-gapped runs but carries no
//! semantic meaning.

use super::error::Result;
use super::Embedder;

pub const DEFAULT_MODEL: &str = "hashed-v1";

pub struct HashedEmbedder {
    model: String,
    dimension: usize,
}

impl HashedEmbedder {
    pub fn new(model: String, dimension: usize) -> Self {
        Self { model, dimension }
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state = fnv1a(text);
        Ok((0..self.dimension)
            // Top 24 bits give an exact f32 in [0, 1).
            .map(|_| (splitmix64(&mut state) >> 40) as f32 / (1u64 << 24) as f32)
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
