//! Decoding lattices attached to packages for sequence training.
//!
//! Parsing lattice archives is left to a [`LatticeProvider`]; the loader only
//! needs the per-stream frame counts to check them against the features.

use crate::error::{Result, SeqfeedError};
use std::collections::HashMap;

/// One arc of a denominator lattice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeArc {
    pub src: u32,
    pub dst: u32,
    /// Output pdf id the arc emits.
    pub pdf: i32,
    pub lm_weight: f32,
    pub am_weight: f32,
}

/// Arc-list lattice for one utterance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lattice {
    pub arcs: Vec<LatticeArc>,
    pub num_states: usize,
}

impl Lattice {
    /// Arcs leaving each state as `(first arc index, arc count)`.
    ///
    /// Arcs must be sorted by source state.
    pub fn states_info(&self) -> Vec<(usize, usize)> {
        let mut info = vec![(0, 0); self.num_states];
        for (i, arc) in self.arcs.iter().enumerate() {
            if let Some(slot) = info.get_mut(arc.src as usize) {
                if slot.1 == 0 {
                    slot.0 = i;
                }
                slot.1 += 1;
            }
        }
        info
    }
}

/// Lattices for one package plus the frame count each was decoded over.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LatticeBatch {
    pub lattices: Vec<Lattice>,
    pub frames: Vec<usize>,
}

impl LatticeBatch {
    pub fn len(&self) -> usize {
        self.lattices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lattices.is_empty()
    }
}

/// Loads the lattices referenced by one package's scp lines.
///
/// Called from loader workers, so it must be safe to share.
pub trait LatticeProvider: Send + Sync {
    fn load(&self, scp_lines: &[String]) -> Result<LatticeBatch>;
}

/// Lattices held in memory, looked up by the utterance id that starts each
/// scp line.
#[derive(Debug, Clone, Default)]
pub struct StaticLattices {
    entries: HashMap<String, (Lattice, usize)>,
}

impl StaticLattices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utt_id: impl Into<String>, lattice: Lattice, frames: usize) {
        self.entries.insert(utt_id.into(), (lattice, frames));
    }

    pub fn with_lattice(mut self, utt_id: impl Into<String>, lattice: Lattice, frames: usize) -> Self {
        self.insert(utt_id, lattice, frames);
        self
    }
}

impl LatticeProvider for StaticLattices {
    fn load(&self, scp_lines: &[String]) -> Result<LatticeBatch> {
        let mut batch = LatticeBatch::default();
        for line in scp_lines {
            let utt_id = line.split_whitespace().next().unwrap_or_default();
            let (lattice, frames) =
                self.entries
                    .get(utt_id)
                    .ok_or_else(|| SeqfeedError::Lattice {
                        message: format!("no lattice for '{}'", utt_id),
                    })?;
            batch.lattices.push(lattice.clone());
            batch.frames.push(*frames);
        }
        Ok(batch)
    }
}
