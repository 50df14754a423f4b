use std::path::PathBuf;

use align_cli::align_core::init_thread_pool;
use align_cli::align_features::OrbExtractor;
use align_cli::{
    composite_path, save_composite, stack_persisted, AlignConfig, Aligner, Canvas, FsImageStore,
    Sampling, StackMethod,
};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "align")]
#[command(about = "Align an image stack onto the coordinate frame of its first image")]
#[command(version)]
struct Cli {
    /// Directory holding the input images (jpg, jpeg, png)
    input: PathBuf,

    /// Resolution reduction on load: 1, 2 or 4. Anything else means full resolution.
    sampling: Option<String>,

    /// Directory the aligned images are written to
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RANSAC seed
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Output canvas of warped images
    #[arg(long, value_enum)]
    canvas: Option<Canvas>,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Focus-stack the aligned images into `<output>(FocusStacking).jpg`
    /// (or `<output>(generalized).jpg`)
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "laplacian")]
    stack: Option<StackMethod>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AlignConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AlignConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.ransac.seed = Some(seed);
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(canvas) = cli.canvas {
        config.canvas = canvas;
    }
    if let Some(method) = cli.stack {
        config.stack.method = Some(method);
    }
    config.validate()?;

    if let Err(e) = init_thread_pool(config.threads) {
        tracing::warn!(error = %e, "using the existing thread pool");
    }

    let sampling = Sampling::from_arg(cli.sampling.as_deref());
    let store = FsImageStore::new(&cli.input, &cli.output).with_sampling(sampling);
    tracing::info!(
        input = %store.input_dir().display(),
        output = %store.output_dir().display(),
        factor = store.sampling().factor(),
        "image store"
    );
    let extractor = OrbExtractor::new(config.features.clone()).context("feature extractor")?;

    let aligner = Aligner::new(store, extractor, config);
    let report = aligner
        .run()
        .with_context(|| format!("aligning {}", cli.input.display()))?;

    let stack = &aligner.config().stack;
    if let Some(method) = stack.method {
        let composite = stack_persisted(aligner.store(), &report, stack, method)
            .context("focus stacking")?;
        save_composite(&composite, &composite_path(aligner.store().output_dir(), method))?;
    }

    if let Some(path) = &cli.report {
        report
            .save_json(path)
            .with_context(|| format!("writing report {}", path.display()))?;
    }
    Ok(())
}
