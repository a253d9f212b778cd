use serde::{Deserialize, Serialize};
use crate::core::errors::{Result, SimStoreError};

/// Offset added to a bucket's cutoff when its pairs are read back.
///
/// Bucketed data only remembers which cutoff a pair cleared, so every pair
/// of a bucket reports `cutoff + SIMILARITY_OFFSET`. Downstream display code
/// depends on this exact value.
pub const SIMILARITY_OFFSET: f32 = 0.05;

/// Width of one persisted `(low, high)` record in bytes.
pub const PAIR_RECORD_BYTES: usize = 8;

/// Cutoffs used when nothing else is configured.
pub const DEFAULT_CUTOFFS: [f32; 5] = [0.9, 0.8, 0.7, 0.6, 0.5];

/// One similarity edge between two documents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTriple {
    pub low: u32,
    pub high: u32,
    pub similarity: f32,
}

impl SimilarityTriple {
    pub fn new(low: u32, high: u32, similarity: f32) -> Self {
        SimilarityTriple { low, high, similarity }
    }
}

impl From<(u32, u32, f32)> for SimilarityTriple {
    fn from((low, high, similarity): (u32, u32, f32)) -> Self {
        SimilarityTriple { low, high, similarity }
    }
}

impl From<SimilarityTriple> for (u32, u32, f32) {
    fn from(t: SimilarityTriple) -> Self {
        (t.low, t.high, t.similarity)
    }
}

/// Strictly descending similarity thresholds defining bucket boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct CutoffTable {
    cutoffs: Vec<f32>,
}

impl CutoffTable {
    pub fn new(cutoffs: Vec<f32>) -> Result<Self> {
        if cutoffs.is_empty() {
            return Err(SimStoreError::InvalidCutoffs("table is empty".to_string()));
        }
        for c in &cutoffs {
            if !c.is_finite() || *c < 0.0 || *c > 1.0 {
                return Err(SimStoreError::InvalidCutoffs(format!(
                    "cutoff {} outside [0, 1]",
                    c
                )));
            }
        }
        if let Some(w) = cutoffs.windows(2).find(|w| w[0] <= w[1]) {
            return Err(SimStoreError::InvalidCutoffs(format!(
                "cutoffs must be strictly descending, found {} then {}",
                w[0], w[1]
            )));
        }
        Ok(CutoffTable { cutoffs })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.cutoffs
    }

    pub fn len(&self) -> usize {
        self.cutoffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cutoffs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.cutoffs.get(index).copied()
    }

    /// Index of the largest cutoff not above `similarity`.
    ///
    /// `None` means the pair falls below the lowest cutoff and is dropped.
    pub fn bucket_for(&self, similarity: f32) -> Option<usize> {
        self.cutoffs.iter().position(|&c| c <= similarity)
    }

    /// Similarity reported for pairs read from bucket `index`.
    pub fn approximate_similarity(&self, index: usize) -> f32 {
        self.cutoffs[index] + SIMILARITY_OFFSET
    }

    /// Bit patterns of the cutoffs, usable as an exact hash key.
    pub fn key_bits(&self) -> Vec<u32> {
        self.cutoffs.iter().map(|c| c.to_bits()).collect()
    }

    /// Parse a comma separated list such as `0.9,0.8,0.7`.
    pub fn parse(list: &str) -> Result<Self> {
        let cutoffs = list
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f32>()
                    .map_err(|e| SimStoreError::InvalidCutoffs(format!("{:?}: {}", s, e)))
            })
            .collect::<Result<Vec<f32>>>()?;
        CutoffTable::new(cutoffs)
    }
}

impl Default for CutoffTable {
    fn default() -> Self {
        CutoffTable {
            cutoffs: DEFAULT_CUTOFFS.to_vec(),
        }
    }
}

impl TryFrom<Vec<f32>> for CutoffTable {
    type Error = SimStoreError;

    fn try_from(cutoffs: Vec<f32>) -> Result<Self> {
        CutoffTable::new(cutoffs)
    }
}

impl From<CutoffTable> for Vec<f32> {
    fn from(table: CutoffTable) -> Self {
        table.cutoffs
    }
}
