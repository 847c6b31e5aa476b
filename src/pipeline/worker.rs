//! Loader workers: materialize a claimed package and shape it into batches.

use crate::error::{Result, SeqfeedError};
use crate::io::FeatureReader;
use crate::lattice::LatticeProvider;
use crate::pipeline::error::StationError;
use crate::pipeline::shaping::{LoadedPackage, Shaper};
use crate::pipeline::station::Station;
use crate::pipeline::types::{Batch, Package};
use crate::transform::FeatureTransform;
use ndarray::{Array2, ArrayView2, s};
use std::sync::Arc;

/// Frame decimation: keep rows `offset, offset + step, offset + 2*step, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSkip {
    step: usize,
    offset: usize,
}

impl FrameSkip {
    /// `offset` is reduced modulo `step`.
    pub fn new(step: usize, offset: usize) -> Self {
        let step = step.max(1);
        Self {
            step,
            offset: offset % step,
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn frames(&self, matrix: ArrayView2<'_, f32>) -> Array2<f32> {
        let start = self.offset.min(matrix.nrows());
        matrix.slice(s![start..;self.step as isize, ..]).to_owned()
    }

    pub fn labels(&self, labels: &[i32]) -> Vec<i32> {
        labels
            .iter()
            .skip(self.offset)
            .step_by(self.step)
            .copied()
            .collect()
    }
}

impl Default for FrameSkip {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

/// Reads, transforms and decimates every stream of a package.
#[derive(Clone)]
pub struct PackageLoader {
    reader: Arc<dyn FeatureReader>,
    transform: Arc<dyn FeatureTransform>,
    lattices: Option<Arc<dyn LatticeProvider>>,
    skip: FrameSkip,
    decimate_labels: bool,
}

impl PackageLoader {
    pub fn new(
        reader: Arc<dyn FeatureReader>,
        transform: Arc<dyn FeatureTransform>,
        lattices: Option<Arc<dyn LatticeProvider>>,
        skip: FrameSkip,
        decimate_labels: bool,
    ) -> Self {
        Self {
            reader,
            transform,
            lattices,
            skip,
            decimate_labels,
        }
    }

    pub fn load(&self, package: &Package) -> Result<LoadedPackage> {
        let mut features = Vec::with_capacity(package.len());
        for entry in &package.features {
            let raw = self.reader.read(entry)?;
            if raw.ncols() != self.transform.input_dim() {
                return Err(SeqfeedError::TransformDimension {
                    expected: self.transform.input_dim(),
                    actual: raw.ncols(),
                });
            }
            let transformed = self.transform.transform(raw.view());
            log::debug!(
                "read {}: {:?} -> {:?}",
                entry.utt_id,
                raw.dim(),
                transformed.dim()
            );
            features.push(self.skip.frames(transformed.view()));
        }

        let labels = if self.decimate_labels {
            package.labels.iter().map(|l| self.skip.labels(l)).collect()
        } else {
            package.labels.clone()
        };

        let lattice = match (&package.lattices, &self.lattices) {
            (Some(lines), Some(provider)) => {
                let batch = provider.load(lines)?;
                check_lattice_frames(package.index, &batch.frames, &features)?;
                Some(Arc::new(batch))
            }
            (Some(_), None) => {
                return Err(SeqfeedError::MissingInput {
                    what: "lattice provider".to_string(),
                });
            }
            (None, _) => None,
        };

        Ok(LoadedPackage {
            index: package.index,
            features,
            labels,
            lattice,
        })
    }
}

fn check_lattice_frames(package: usize, lattice: &[usize], features: &[Array2<f32>]) -> Result<()> {
    if lattice.len() != features.len() {
        return Err(SeqfeedError::Lattice {
            message: format!(
                "package {} has {} streams but {} lattices",
                package,
                features.len(),
                lattice.len()
            ),
        });
    }
    for (stream, (&frames, matrix)) in lattice.iter().zip(features).enumerate() {
        if frames != matrix.nrows() {
            return Err(SeqfeedError::LatticeFrameMismatch {
                package,
                stream,
                lattice: frames,
                features: matrix.nrows(),
            });
        }
    }
    Ok(())
}

/// Station wrapping a loader and a shaping policy.
pub struct LoaderStation {
    loader: PackageLoader,
    shaper: Arc<dyn Shaper>,
    packages: usize,
    batches: usize,
}

impl LoaderStation {
    pub fn new(loader: PackageLoader, shaper: Arc<dyn Shaper>) -> Self {
        Self {
            loader,
            shaper,
            packages: 0,
            batches: 0,
        }
    }
}

impl Station for LoaderStation {
    type Input = Arc<Package>;
    type Output = Vec<Batch>;

    fn process(
        &mut self,
        input: Self::Input,
    ) -> std::result::Result<Option<Self::Output>, StationError> {
        // A package is shaped whole or not at all
        let batches = self
            .loader
            .load(&input)
            .and_then(|loaded| self.shaper.shape(loaded))
            .map_err(|e| StationError::Fatal(e.to_string()))?;

        self.packages += 1;
        self.batches += batches.len();
        if let Some(first) = batches.first() {
            log::debug!(
                "package {} -> {} {} batch(es) of {:?}",
                input.index,
                batches.len(),
                self.shaper.name(),
                first.features.shape()
            );
        }
        Ok(Some(batches))
    }

    fn name(&self) -> &'static str {
        "loader"
    }

    fn shutdown(&mut self) {
        log::debug!(
            "loader shaped {} packages into {} batches",
            self.packages,
            self.batches
        );
    }
}
