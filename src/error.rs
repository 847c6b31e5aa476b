//! Error types for seqfeed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeqfeedError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid criterion '{tag}': {message}")]
    InvalidCriterion { tag: String, message: String },

    #[error("No feature transform supplied")]
    MissingFeatureTransform,

    #[error("Missing loader input: {what}")]
    MissingInput { what: String },

    // Index and label files
    #[error("Feature index not found at {path}")]
    FeatureIndexNotFound { path: String },

    #[error("Alignment file not found at {path}")]
    AlignmentNotFound { path: String },

    #[error("Lattice index not found at {path}")]
    LatticeIndexNotFound { path: String },

    #[error("Malformed index line {line}: {message}")]
    MalformedIndex { line: String, message: String },

    #[error("Malformed alignment at line {line_no}: {message}")]
    MalformedAlignment { line_no: usize, message: String },

    // Feature decoding
    #[error("Matrix format error in {path}: {message}")]
    MatrixFormat { path: String, message: String },

    #[error("Utterance {utt_id} not found in feature source")]
    UtteranceNotFound { utt_id: String },

    #[error("Feature transform expects {expected} columns, got {actual}")]
    TransformDimension { expected: usize, actual: usize },

    #[error("Lattice error: {message}")]
    Lattice { message: String },

    // Pipeline consistency
    #[error(
        "Lattice frame count mismatch in package {package}, stream {stream}: lattice has {lattice} frames, features have {features}"
    )]
    LatticeFrameMismatch {
        package: usize,
        stream: usize,
        lattice: usize,
        features: usize,
    },

    #[error("Labels of stream {stream} ({labels}) are longer than the batch ({frames} frames)")]
    LabelOverflow {
        stream: usize,
        labels: usize,
        frames: usize,
    },

    #[error("Loader pipeline failed: {message}")]
    PipelineFailed { message: String },

    #[error("Worker thread '{name}' panicked")]
    WorkerPanicked { name: String },

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SeqfeedError>;
