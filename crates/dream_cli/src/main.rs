mod data;
mod processing;

use clap::{Parser, ValueHint};
use data::{load_image, save_preview, save_raw_tiff};
use dream_core::image::scale_raw;
use dream_core::tiling::DEFAULT_TILE_SIZE;
use dream_core::{FilterBankModel, Model, Objective, SynthesisConfig, Variant, CHANNELS};
use ndarray::Array3;
use processing::{ProcessingProgress, SynthesisWorker};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type DynError = Box<dyn Error>;

/// Offset added to uniform noise so the start image sits near the model's
/// input mean.
const NOISE_OFFSET: f32 = 100.0;

/// Default side of the noise start image.
const DEFAULT_NOISE_SIZE: usize = 224;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Feature visualization and DeepDream with tiled, multiscale gradient ascent"
)]
struct Cli {
    /// Start image (JPEG, PNG or TIFF). Uniform noise around 100 when omitted
    #[arg(value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,

    /// Synthesis algorithm: naive, multiscale, laplacian or deepdream
    #[arg(long, default_value_t = Variant::DeepDream)]
    variant: Variant,

    /// Activations to maximize: `layer[:channel][^2]` terms joined by `+`
    #[arg(long, default_value = "edges^2")]
    objective: Objective,

    /// Iterations per octave (variant default when omitted)
    #[arg(long)]
    iterations: Option<usize>,

    /// Number of octaves (variant default when omitted)
    #[arg(long)]
    octaves: Option<usize>,

    /// Resolution ratio between octaves
    #[arg(long)]
    octave_scale: Option<f64>,

    /// Gradient-ascent step size (variant default when omitted)
    #[arg(long)]
    step: Option<f32>,

    /// Tile side in pixels for tiled gradient evaluation
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    tile_size: usize,

    /// Laplacian pyramid levels (laplacian variant)
    #[arg(long)]
    lap_levels: Option<usize>,

    /// Evaluate tiles in parallel
    #[arg(long)]
    parallel_tiles: bool,

    /// Seed for tile shifts and the noise start image
    #[arg(long)]
    seed: Option<u64>,

    /// Side of the noise start image when no input is given
    #[arg(long, default_value_t = DEFAULT_NOISE_SIZE)]
    noise_size: usize,

    /// Directory for octave previews and the final result
    #[arg(long, short, default_value = "dream_output", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Print the model's layers and channel counts, then exit
    #[arg(long)]
    list_layers: bool,

    /// Log per-octave details
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// Variant defaults overridden by whatever was given on the command line.
    fn synthesis_config(&self) -> SynthesisConfig<f32> {
        let mut config = SynthesisConfig::for_variant(self.variant);
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(octaves) = self.octaves {
            config.octave_count = octaves;
        }
        if let Some(scale) = self.octave_scale {
            config.octave_scale = scale;
        }
        if let Some(step) = self.step {
            config.step = step;
        }
        if let Some(levels) = self.lap_levels {
            config.laplacian_levels = levels;
        }
        config.tile.tile_size = self.tile_size;
        config.tile.parallel = self.parallel_tiles;
        config
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn noise_image(size: usize, seed: Option<u64>) -> Array3<f32> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Array3::from_shape_fn((size, size, CHANNELS), |_| rng.gen::<f32>() + NOISE_OFFSET)
}

fn list_layers<M: Model<f32>>(model: &M) {
    for layer in model.layers() {
        println!("{:<10} {} channels", layer.name, layer.channels);
    }
    println!("Number of layers: {}", model.layers().len());
    println!("Total number of feature channels: {}", model.total_channels());
}

fn start_image(cli: &Cli) -> Result<Array3<f32>, DynError> {
    match &cli.input {
        Some(path) => {
            let image = load_image(path)?;
            let (h, w, _) = image.dim();
            info!("Loaded {} ({}x{})", path.display(), w, h);
            Ok(image)
        }
        None => {
            if cli.noise_size == 0 {
                return Err("noise size must be > 0".into());
            }
            info!("Starting from {0}x{0} noise", cli.noise_size);
            Ok(noise_image(cli.noise_size, cli.seed))
        }
    }
}

/// Receive worker messages until it finishes, saving previews as they come.
fn run_worker(worker: SynthesisWorker, output_dir: &Path) -> Result<(), DynError> {
    let mut last_preview: Option<Array3<f32>> = None;

    while let Some(message) = worker.recv() {
        match message {
            ProcessingProgress::Started { total_iterations } => {
                debug!(total_iterations, "synthesis started");
            }
            ProcessingProgress::Progress {
                octave,
                iteration,
                fraction,
            } => {
                info!(
                    "octave {} iteration {} ({:.0}%)",
                    octave,
                    iteration,
                    fraction * 100.0
                );
            }
            ProcessingProgress::Octave { octave, preview } => {
                let path = output_dir.join(format!("octave_{}.png", octave));
                if let Err(e) = save_preview(preview.view(), &path) {
                    worker.cancel();
                    return Err(e.into());
                }
                info!("Saved {}", path.display());
                last_preview = Some(preview);
            }
            ProcessingProgress::Finished { result } => {
                worker.join();
                let raw_path = output_dir.join("result.tiff");
                save_raw_tiff(result.view(), &raw_path)?;
                if let Some(preview) = &last_preview {
                    let path = output_dir.join("result.png");
                    save_preview(preview.view(), &path)?;
                    info!("Saved {} and {}", path.display(), raw_path.display());
                }
                return Ok(());
            }
            ProcessingProgress::Cancelled => {
                worker.join();
                warn!("Synthesis cancelled");
                return Ok(());
            }
            ProcessingProgress::Error(msg) => return Err(msg.into()),
        }
    }

    Err("synthesis worker exited without a result".into())
}

fn main() -> Result<(), DynError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let model = FilterBankModel::<f32>::new();
    if cli.list_layers {
        list_layers(&model);
        return Ok(());
    }

    let config = cli.synthesis_config();
    config.validate()?;
    // Fail on unknown layers before any image work
    model.objective(&cli.objective)?;

    let image = start_image(&cli)?;
    fs::create_dir_all(&cli.output_dir)?;
    save_preview(
        scale_raw(image.view(), 1.0 / 255.0).view(),
        &cli.output_dir.join("input.png"),
    )?;

    info!(
        "Running {} on '{}': {} octaves x {} iterations",
        config.variant, cli.objective, config.octave_count, config.iterations
    );
    let worker = SynthesisWorker::spawn(model, cli.objective.clone(), config, image, cli.seed);
    run_worker(worker, &cli.output_dir)
}
