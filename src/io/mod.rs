//! Feature, index and alignment readers.

pub mod alignment;
pub mod ark;
pub mod scp;

pub use alignment::{AlignmentMap, read_alignment};
pub use ark::{ArkReader, write_matrix};
pub use scp::{ScpEntry, read_feature_scp, read_scp_index};

use crate::error::{Result, SeqfeedError};
use ndarray::Array2;
use std::collections::HashMap;

/// Source of raw feature matrices.
///
/// Shared by every loader worker, so implementations must be safe to call
/// concurrently.
pub trait FeatureReader: Send + Sync {
    /// Materialize the matrix an index entry points to (frames × dims).
    fn read(&self, entry: &ScpEntry) -> Result<Array2<f32>>;

    /// Number of frames, without decoding more than needed.
    fn frame_count(&self, entry: &ScpEntry) -> Result<usize> {
        Ok(self.read(entry)?.nrows())
    }
}

/// Feature matrices held in memory, keyed by utterance id.
///
/// Useful for tests and for corpora small enough to preload.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFeatures {
    order: Vec<String>,
    matrices: HashMap<String, Array2<f32>>,
}

impl InMemoryFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_utterance(mut self, utt_id: impl Into<String>, matrix: Array2<f32>) -> Self {
        self.insert(utt_id, matrix);
        self
    }

    /// Add or replace an utterance. Replacing keeps its original position.
    pub fn insert(&mut self, utt_id: impl Into<String>, matrix: Array2<f32>) {
        let utt_id = utt_id.into();
        if !self.matrices.contains_key(&utt_id) {
            self.order.push(utt_id.clone());
        }
        self.matrices.insert(utt_id, matrix);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Index entries for every utterance in insertion order.
    pub fn entries(&self) -> Vec<ScpEntry> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, id)| ScpEntry::new(id.as_str(), "memory", i as u64))
            .collect()
    }
}

impl FeatureReader for InMemoryFeatures {
    fn read(&self, entry: &ScpEntry) -> Result<Array2<f32>> {
        self.matrices
            .get(&entry.utt_id)
            .cloned()
            .ok_or_else(|| SeqfeedError::UtteranceNotFound {
                utt_id: entry.utt_id.clone(),
            })
    }

    fn frame_count(&self, entry: &ScpEntry) -> Result<usize> {
        self.matrices
            .get(&entry.utt_id)
            .map(|m| m.nrows())
            .ok_or_else(|| SeqfeedError::UtteranceNotFound {
                utt_id: entry.utt_id.clone(),
            })
    }
}
