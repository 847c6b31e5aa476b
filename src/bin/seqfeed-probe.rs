use anyhow::{Context, Result, bail};
use clap::Parser;
use seqfeed::cli::Cli;
use seqfeed::io::{ArkReader, read_feature_scp};
use seqfeed::transform::{IdentityTransform, SpliceTransform};
use seqfeed::{BatchLoader, Criterion, FeatureDim, FeatureReader, FeatureTransform, LoaderConfig};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
struct EpochReport {
    epoch: usize,
    batches: usize,
    packages: usize,
    frames: usize,
    seconds: f64,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    version: String,
    criterion: Criterion,
    output_dim: FeatureDim,
    store_len: usize,
    epochs: Vec<EpochReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    let mut config = match &cli.config {
        Some(path) => LoaderConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    if let Some(tag) = &cli.criterion {
        config.criterion = tag.parse()?;
    }
    if let Some(n) = cli.nstreams {
        config.batch_size = n;
    }
    let config = config.with_env_overrides();

    let dim = match cli.dim {
        Some(dim) => dim,
        None => detect_dim(&cli)?,
    };
    let transform: Arc<dyn FeatureTransform> = if cli.splice > 0 {
        Arc::new(SpliceTransform::new(dim, cli.splice, cli.splice))
    } else {
        Arc::new(IdentityTransform::new(dim))
    };

    let criterion = config.criterion;
    let mut loader = BatchLoader::builder(config)
        .feature_scp(&cli.feats)
        .alignment_file(&cli.ali)
        .transform(transform)
        .build()
        .context("starting loader")?;

    let mut epochs = Vec::with_capacity(cli.epochs);
    for epoch in 0..cli.epochs {
        if epoch > 0 {
            loader.join_input()?;
            let offset = loader.config().effective_skip_offset();
            loader.reset(cli.shuffle, offset)?;
        }
        epochs.push(run_epoch(&mut loader, epoch)?);
    }
    loader.join_input()?;
    let summary = loader.join_builder()?;
    log::info!(
        "store: {} packages ({} utterances accepted, {} skipped)",
        summary.packages,
        summary.accepted,
        summary.skipped
    );

    if cli.json {
        let report = ProbeReport {
            version: seqfeed::version_string(),
            criterion,
            output_dim: loader.output_dim(),
            store_len: loader.store_len(),
            epochs,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn run_epoch(loader: &mut BatchLoader, epoch: usize) -> Result<EpochReport> {
    let start = Instant::now();
    let mut batches = 0;
    let mut frames = 0;
    let mut packages = HashSet::new();

    while let Some(batch) = loader.get_input()? {
        let waited = start.elapsed();
        log::debug!(
            "batch {} (package {}, slice {}/{}): features {:?}, lengths {:?}, at {:.3}s",
            batches,
            batch.package,
            batch.slice + 1,
            batch.slices,
            batch.features.shape(),
            batch.lengths,
            waited.as_secs_f64()
        );
        batches += 1;
        frames += batch.lengths.iter().sum::<usize>();
        packages.insert(batch.package);
    }

    let seconds = start.elapsed().as_secs_f64();
    log::info!(
        "epoch {}: {} batches from {} packages in {:.3}s",
        epoch,
        batches,
        packages.len(),
        seconds
    );
    Ok(EpochReport {
        epoch,
        batches,
        packages: packages.len(),
        frames,
        seconds,
    })
}

fn detect_dim(cli: &Cli) -> Result<usize> {
    let entries = read_feature_scp(&cli.feats)
        .with_context(|| format!("reading {}", cli.feats.display()))?;
    let Some(first) = entries.first() else {
        bail!("{} lists no utterances", cli.feats.display());
    };
    let matrix = ArkReader::new()
        .read(first)
        .with_context(|| format!("reading {}", first))?;
    log::info!("detected feature dim {} from {}", matrix.ncols(), first.utt_id);
    Ok(matrix.ncols())
}
