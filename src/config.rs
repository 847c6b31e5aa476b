use crate::criterion::{Criterion, Shaping};
use crate::defaults;
use crate::error::{Result, SeqfeedError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Loader configuration.
///
/// Built once before the loader starts and shared read-only by every
/// component. Unknown keys are rejected when deserializing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Longest admitted utterance, in frames after skipping.
    pub max_input_seq_length: usize,
    /// Streams per package (`nstreams`).
    #[serde(alias = "nstreams")]
    pub batch_size: usize,
    /// Sub-batch width in slice mode.
    pub num_frames_batch: usize,
    pub skip_frame: usize,
    pub skip_offset: usize,
    /// Shuffle the package store on every reset once it is complete.
    pub shuffle: bool,
    /// Batch queue capacity.
    pub queue_cache: usize,
    /// Loader worker count.
    pub io_thread_num: usize,
    pub criterion: Criterion,
    /// Leading context frames replicated in TDNN mode.
    pub tdnn_start_frames: usize,
    /// Trailing context frames replicated in TDNN mode.
    pub tdnn_end_frames: usize,
    pub poll_interval_ms: u64,
    /// Shuffle seed. Unseeded loaders draw from the OS.
    pub seed: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_input_seq_length: defaults::MAX_INPUT_SEQ_LENGTH,
            batch_size: defaults::BATCH_SIZE,
            num_frames_batch: defaults::NUM_FRAMES_BATCH,
            skip_frame: defaults::SKIP_FRAME,
            skip_offset: defaults::SKIP_OFFSET,
            shuffle: false,
            queue_cache: defaults::QUEUE_CACHE,
            io_thread_num: defaults::IO_THREAD_NUM,
            criterion: Criterion::default(),
            tdnn_start_frames: 0,
            tdnn_end_frames: 0,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            seed: None,
        }
    }
}

impl LoaderConfig {
    /// Load and validate a configuration from a TOML file.
    ///
    /// Missing keys take their default values.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SeqfeedError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: LoaderConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every option for a usable value.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_input_seq_length", self.max_input_seq_length),
            ("batch_size", self.batch_size),
            ("num_frames_batch", self.num_frames_batch),
            ("skip_frame", self.skip_frame),
            ("queue_cache", self.queue_cache),
            ("io_thread_num", self.io_thread_num),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SeqfeedError::ConfigInvalidValue {
                    key: key.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(SeqfeedError::ConfigInvalidValue {
                key: "poll_interval_ms".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.criterion.shaping() != Shaping::Tdnn
            && (self.tdnn_start_frames > 0 || self.tdnn_end_frames > 0)
        {
            log::warn!(
                "tdnn context ({}, {}) ignored for criterion '{}'",
                self.tdnn_start_frames,
                self.tdnn_end_frames,
                self.criterion
            );
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - SEQFEED_IO_THREAD_NUM → io_thread_num
    /// - SEQFEED_QUEUE_CACHE → queue_cache
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(threads) = env_usize("SEQFEED_IO_THREAD_NUM") {
            self.io_thread_num = threads;
        }
        if let Some(cache) = env_usize("SEQFEED_QUEUE_CACHE") {
            self.queue_cache = cache;
        }
        self
    }

    /// Skip offset reduced modulo the skip factor.
    pub fn effective_skip_offset(&self) -> usize {
        self.skip_offset % self.skip_frame.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let value = std::env::var(key).ok().filter(|v| !v.is_empty())?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring {}={}: not a non-negative integer", key, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criterion::Objective;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Serializes tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: only called with ENV_LOCK held.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_seqfeed_env() {
        remove_env("SEQFEED_IO_THREAD_NUM");
        remove_env("SEQFEED_QUEUE_CACHE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = LoaderConfig::default();

        assert_eq!(config.max_input_seq_length, 1500);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.num_frames_batch, 20);
        assert_eq!(config.skip_frame, 1);
        assert_eq!(config.skip_offset, 0);
        assert!(!config.shuffle);
        assert_eq!(config.queue_cache, 10);
        assert_eq!(config.io_thread_num, 1);
        assert_eq!(config.criterion.objective(), Objective::CrossEntropy);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.seed, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            batch_size = 16
            num_frames_batch = 40
            skip_frame = 3
            skip_offset = 1
            shuffle = true
            queue_cache = 4
            io_thread_num = 2
            criterion = "whole,mmi"
            seed = 7
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = LoaderConfig::load(temp_file.path()).unwrap();

        assert_eq!(config.batch_size, 16);
        assert_eq!(config.num_frames_batch, 40);
        assert_eq!(config.skip_frame, 3);
        assert_eq!(config.skip_offset, 1);
        assert!(config.shuffle);
        assert_eq!(config.queue_cache, 4);
        assert_eq!(config.io_thread_num, 2);
        assert_eq!(config.criterion.shaping(), Shaping::Whole);
        assert_eq!(config.seed, Some(7));
        // Untouched keys keep their defaults
        assert_eq!(config.max_input_seq_length, 1500);
    }

    #[test]
    fn test_nstreams_alias() {
        let config = LoaderConfig::from_toml_str("nstreams = 8").unwrap();
        assert_eq!(config.batch_size, 8);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = LoaderConfig::from_toml_str("batch_size = 2\ndo_skip_lab = true").unwrap_err();
        assert!(matches!(err, SeqfeedError::Config(_)));
        assert!(err.to_string().contains("do_skip_lab"));
    }

    #[test]
    fn test_bad_criterion_rejected() {
        assert!(LoaderConfig::from_toml_str("criterion = \"whole\"").is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in [
            "max_input_seq_length",
            "batch_size",
            "num_frames_batch",
            "skip_frame",
            "queue_cache",
            "io_thread_num",
            "poll_interval_ms",
        ] {
            let err = LoaderConfig::from_toml_str(&format!("{} = 0", key)).unwrap_err();
            match err {
                SeqfeedError::ConfigInvalidValue { key: k, .. } => assert_eq!(k, key),
                other => panic!("expected ConfigInvalidValue for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = LoaderConfig::load(Path::new("/nonexistent/seqfeed.toml")).unwrap_err();
        assert!(matches!(err, SeqfeedError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_effective_skip_offset_wraps() {
        let config = LoaderConfig {
            skip_frame: 3,
            skip_offset: 7,
            ..LoaderConfig::default()
        };
        assert_eq!(config.effective_skip_offset(), 1);
    }

    #[test]
    fn test_poll_interval() {
        let config = LoaderConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_seqfeed_env();

        set_env("SEQFEED_IO_THREAD_NUM", "4");
        set_env("SEQFEED_QUEUE_CACHE", "32");
        let config = LoaderConfig::default().with_env_overrides();
        assert_eq!(config.io_thread_num, 4);
        assert_eq!(config.queue_cache, 32);

        clear_seqfeed_env();
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_seqfeed_env();

        set_env("SEQFEED_IO_THREAD_NUM", "many");
        set_env("SEQFEED_QUEUE_CACHE", "");
        let config = LoaderConfig::default().with_env_overrides();
        assert_eq!(config.io_thread_num, 1);
        assert_eq!(config.queue_cache, 10);

        clear_seqfeed_env();
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = LoaderConfig {
            batch_size: 4,
            criterion: "tdnn,ce".parse().unwrap(),
            tdnn_start_frames: 2,
            tdnn_end_frames: 3,
            ..LoaderConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed = LoaderConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
