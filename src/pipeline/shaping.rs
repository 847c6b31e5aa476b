//! Batch shaping policies.
//!
//! A loaded package (transformed, decimated matrices plus labels) is turned
//! into one or more [`Batch`]es. The policy is picked once from the
//! criterion; workers only see a [`Shaper`].

use crate::config::LoaderConfig;
use crate::criterion::{Criterion, LabelEncoding, Shaping};
use crate::error::{Result, SeqfeedError};
use crate::labels::SparseLabels;
use crate::lattice::LatticeBatch;
use crate::pipeline::types::{Batch, Features, Labels};
use ndarray::{Array2, Array3, Axis, s};
use std::sync::Arc;

/// A package after reading, transforming and frame skipping.
#[derive(Debug, Clone)]
pub struct LoadedPackage {
    pub index: usize,
    /// One `[frames, dim]` matrix per stream.
    pub features: Vec<Array2<f32>>,
    pub labels: Vec<Vec<i32>>,
    pub lattice: Option<Arc<LatticeBatch>>,
}

impl LoadedPackage {
    pub fn lengths(&self) -> Vec<usize> {
        self.features.iter().map(|m| m.nrows()).collect()
    }

    pub fn max_len(&self) -> usize {
        self.features.iter().map(|m| m.nrows()).max().unwrap_or(0)
    }
}

/// Stack streams into `[time, streams, dim]`, zero-padding each stream's tail.
pub fn stack_padded(features: &[Array2<f32>], time: usize, dim: usize) -> Result<Array3<f32>> {
    let mut out = Array3::zeros((time, features.len(), dim));
    for (stream, matrix) in features.iter().enumerate() {
        if matrix.ncols() != dim {
            return Err(SeqfeedError::TransformDimension {
                expected: dim,
                actual: matrix.ncols(),
            });
        }
        let rows = matrix.nrows().min(time);
        out.slice_mut(s![..rows, stream, ..])
            .assign(&matrix.slice(s![..rows, ..]));
    }
    Ok(out)
}

/// `[streams, width]` label array, zero-padded.
pub fn pad_labels(labels: &[Vec<i32>], width: usize) -> Result<Array2<i32>> {
    let mut out = Array2::zeros((labels.len(), width));
    for (stream, seq) in labels.iter().enumerate() {
        if seq.len() > width {
            return Err(SeqfeedError::LabelOverflow {
                stream,
                labels: seq.len(),
                frames: width,
            });
        }
        for (t, &label) in seq.iter().enumerate() {
            out[[stream, t]] = label;
        }
    }
    Ok(out)
}

fn encode_labels(encoding: LabelEncoding, labels: &[Vec<i32>], width: usize) -> Result<Labels> {
    match encoding {
        LabelEncoding::Dense => Ok(Labels::Dense(pad_labels(labels, width)?)),
        LabelEncoding::Sparse => Ok(Labels::Sparse(SparseLabels::from_sequences(labels))),
    }
}

/// Turns one loaded package into batches.
pub trait Shaper: Send + Sync {
    fn shape(&self, package: LoadedPackage) -> Result<Vec<Batch>>;

    /// Policy name for logging.
    fn name(&self) -> &'static str;
}

/// One batch per package, padded to the longest stream.
#[derive(Debug, Clone, Copy)]
pub struct WholeShaper {
    dim: usize,
    encoding: LabelEncoding,
}

impl WholeShaper {
    pub fn new(dim: usize, encoding: LabelEncoding) -> Self {
        Self { dim, encoding }
    }
}

impl Shaper for WholeShaper {
    fn shape(&self, package: LoadedPackage) -> Result<Vec<Batch>> {
        let max_len = package.max_len();
        let lengths = package.lengths();
        let features = stack_padded(&package.features, max_len, self.dim)?;
        let labels = encode_labels(self.encoding, &package.labels, max_len)?;
        Ok(vec![Batch {
            package: package.index,
            slice: 0,
            slices: 1,
            features: Features::Sequence(features),
            labels,
            lengths,
            lattice: package.lattice,
        }])
    }

    fn name(&self) -> &'static str {
        "whole"
    }
}

/// Consecutive fixed-width time slices of the padded package.
#[derive(Debug, Clone, Copy)]
pub struct SliceShaper {
    dim: usize,
    width: usize,
    encoding: LabelEncoding,
}

impl SliceShaper {
    pub fn new(dim: usize, width: usize, encoding: LabelEncoding) -> Self {
        Self {
            dim,
            width: width.max(1),
            encoding,
        }
    }
}

impl Shaper for SliceShaper {
    fn shape(&self, package: LoadedPackage) -> Result<Vec<Batch>> {
        let lengths = package.lengths();
        let slices = package.max_len().div_ceil(self.width);
        let padded = stack_padded(&package.features, slices * self.width, self.dim)?;

        let mut batches = Vec::with_capacity(slices);
        for slice in 0..slices {
            let start = slice * self.width;
            let end = start + self.width;
            let slice_labels: Vec<Vec<i32>> = package
                .labels
                .iter()
                .map(|seq| seq[start.min(seq.len())..end.min(seq.len())].to_vec())
                .collect();
            batches.push(Batch {
                package: package.index,
                slice,
                slices,
                features: Features::Sequence(padded.slice(s![start..end, .., ..]).to_owned()),
                labels: encode_labels(self.encoding, &slice_labels, self.width)?,
                lengths: lengths
                    .iter()
                    .map(|len| len.saturating_sub(start).min(self.width))
                    .collect(),
                lattice: package.lattice.clone(),
            });
        }
        Ok(batches)
    }

    fn name(&self) -> &'static str {
        "slice"
    }
}

/// Reinterprets the feature axis as `[context, base, 1]` for a
/// convolutional front end, flattening time and streams.
pub struct ConvShaper {
    inner: Box<dyn Shaper>,
    context: usize,
    base: usize,
}

impl ConvShaper {
    pub fn new(inner: Box<dyn Shaper>, context: usize, base: usize) -> Self {
        Self {
            inner,
            context,
            base,
        }
    }
}

impl Shaper for ConvShaper {
    fn shape(&self, package: LoadedPackage) -> Result<Vec<Batch>> {
        self.inner
            .shape(package)?
            .into_iter()
            .map(|mut batch| -> Result<Batch> {
                batch.features = match batch.features {
                    Features::Sequence(seq) => {
                        let (time, streams, _) = seq.dim();
                        let seq = seq.as_standard_layout().into_owned();
                        Features::Conv(seq.into_shape_with_order((
                            time * streams,
                            self.context,
                            self.base,
                            1,
                        ))?)
                    }
                    conv @ Features::Conv(_) => conv,
                };
                Ok(batch)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "cnn"
    }
}

/// Whole batch with `start` copies of the first time step prepended and
/// `end` copies of the last appended. Labels and lengths are unchanged.
#[derive(Debug, Clone, Copy)]
pub struct TdnnShaper {
    whole: WholeShaper,
    start: usize,
    end: usize,
}

impl TdnnShaper {
    pub fn new(whole: WholeShaper, start: usize, end: usize) -> Self {
        Self { whole, start, end }
    }
}

impl Shaper for TdnnShaper {
    fn shape(&self, package: LoadedPackage) -> Result<Vec<Batch>> {
        let mut batches = self.whole.shape(package)?;
        for batch in &mut batches {
            if let Features::Sequence(seq) = &batch.features {
                batch.features = Features::Sequence(pad_context(seq, self.start, self.end));
            }
        }
        Ok(batches)
    }

    fn name(&self) -> &'static str {
        "tdnn"
    }
}

fn pad_context(seq: &Array3<f32>, start: usize, end: usize) -> Array3<f32> {
    let (time, streams, dim) = seq.dim();
    if time == 0 {
        return seq.clone();
    }
    let mut out = Array3::zeros((start + time + end, streams, dim));
    let first = seq.index_axis(Axis(0), 0);
    let last = seq.index_axis(Axis(0), time - 1);
    for t in 0..start {
        out.index_axis_mut(Axis(0), t).assign(&first);
    }
    out.slice_mut(s![start..start + time, .., ..]).assign(seq);
    for t in start + time..start + time + end {
        out.index_axis_mut(Axis(0), t).assign(&last);
    }
    out
}

/// Build the shaper for a criterion.
///
/// `input_dim` and `output_dim` are the feature transform's dimensions; conv
/// policies require `output_dim` to be a multiple of `input_dim`.
pub fn shaper_for(
    criterion: Criterion,
    config: &LoaderConfig,
    input_dim: usize,
    output_dim: usize,
) -> Box<dyn Shaper> {
    let encoding = criterion.label_encoding();
    let whole = WholeShaper::new(output_dim, encoding);
    let slice = SliceShaper::new(output_dim, config.num_frames_batch, encoding);
    let context = output_dim / input_dim.max(1);
    match criterion.shaping() {
        Shaping::Whole => Box::new(whole),
        Shaping::Slice => Box::new(slice),
        Shaping::ConvWhole => Box::new(ConvShaper::new(Box::new(whole), context, input_dim)),
        Shaping::ConvSlice => Box::new(ConvShaper::new(Box::new(slice), context, input_dim)),
        Shaping::Tdnn => Box::new(TdnnShaper::new(
            whole,
            config.tdnn_start_frames,
            config.tdnn_end_frames,
        )),
    }
}
