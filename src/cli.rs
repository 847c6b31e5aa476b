//! Command-line interface for seqfeed-probe
//!
//! Provides argument parsing using clap derive macros.

use clap::Parser;
use std::path::PathBuf;

/// Run the batch loader over a corpus and report what it produces
#[derive(Parser, Debug)]
#[command(
    name = "seqfeed-probe",
    version,
    about = "Run the batch loader over a corpus and report batch shapes and timing"
)]
pub struct Cli {
    /// Loader configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Feature index (utt_id path:offset per line)
    #[arg(long, value_name = "PATH")]
    pub feats: PathBuf,

    /// Alignment file, plain or .gz
    #[arg(long, value_name = "PATH")]
    pub ali: PathBuf,

    /// Number of epochs to run
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,

    /// Criterion override (e.g. ce, whole,ce, cnn,ce, tdnn,ce)
    #[arg(long, value_name = "TAG")]
    pub criterion: Option<String>,

    /// Streams per package override
    #[arg(long, value_name = "N")]
    pub nstreams: Option<usize>,

    /// Input feature dimension (default: read from the first utterance)
    #[arg(long, value_name = "DIM")]
    pub dim: Option<usize>,

    /// Splice this many frames on each side (0 = identity transform)
    #[arg(long, default_value_t = 0, value_name = "FRAMES")]
    pub splice: usize,

    /// Shuffle packages from the second epoch on
    #[arg(long)]
    pub shuffle: bool,

    /// Print a JSON report on stdout
    #[arg(long)]
    pub json: bool,

    /// Verbose output (-v: per-batch shapes, -vv: per-utterance reads)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log filter implied by the verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::try_parse_from(["seqfeed-probe", "--feats", "f.scp", "--ali", "a.gz"]).unwrap();
        assert_eq!(cli.feats, PathBuf::from("f.scp"));
        assert_eq!(cli.epochs, 1);
        assert_eq!(cli.splice, 0);
        assert!(!cli.json);
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_parse_overrides() {
        let cli = Cli::try_parse_from([
            "seqfeed-probe",
            "--feats",
            "f.scp",
            "--ali",
            "a.txt",
            "--criterion",
            "cnn,ce",
            "--nstreams",
            "8",
            "--splice",
            "5",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.criterion.as_deref(), Some("cnn,ce"));
        assert_eq!(cli.nstreams, Some(8));
        assert_eq!(cli.splice, 5);
        assert_eq!(cli.log_level(), "trace");
    }

    #[test]
    fn test_feats_required() {
        assert!(Cli::try_parse_from(["seqfeed-probe", "--ali", "a.txt"]).is_err());
    }
}
