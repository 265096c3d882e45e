//! Program entry point: parses the command line, loads the configuration and
//! the seed cells, and slides the annealing window over the input frames.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use cellanneal::config::{AutoTempMethod, Config, RunOptions, TemperatureOptions};
use cellanneal::engine::{CostMode, FrameSource, InitialState, ScheduleKind, SelectionStrategy, WindowDriver};
use cellanneal::error::RunError;
use cellanneal::io::{read_committed, read_initial_cells, FileSink, FrameRange, ImageSequence, OutputDirs};

#[derive(Debug, Parser)]
#[command(name = "cellanneal")]
#[command(about = "Fit bacillus cell models to a microscopy time series by windowed simulated annealing")]
#[command(version)]
struct Cli {
    /// Input filename pattern, e.g. "frames/img%03d.png"; with z-slices
    /// the frame and slice numbers, e.g. "frames/img%03d_z%d.png".
    #[arg(short, long)]
    input: String,

    /// Output directory for the lineage log and overlay images.
    #[arg(short, long)]
    output: PathBuf,

    /// Configuration file (JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Initial cell configuration (CSV: name,x,y,width,length,rotation[,opacity]).
    #[arg(short = 'x', long, required_unless_present = "continue_from")]
    initial: Option<PathBuf>,

    /// Output directory for the best-fit synthetic images.
    #[arg(short, long)]
    bestfit: PathBuf,

    /// Output directory for residual images.
    #[arg(short, long)]
    residual: Option<PathBuf>,

    /// Debug directory; enables debug.csv.
    #[arg(short, long)]
    debug: Option<PathBuf>,

    /// Iterations between two debug records.
    #[arg(long, default_value = "100")]
    debug_stride: usize,

    /// First frame number.
    #[arg(long, default_value = "0")]
    frame_first: usize,

    /// Last frame number; -1 runs until the first missing frame.
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    frame_last: i64,

    /// Use the distance-weighted objective.
    #[arg(long)]
    dist: bool,

    /// Worker threads (defaults to the number of processors).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Annealing jobs per window (defaults to --workers).
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Candidates retained per window (at most --jobs).
    #[arg(long, default_value = "1")]
    keep: usize,

    /// Selection strategy across jobs.
    #[arg(long, value_enum, default_value_t = SelectionStrategy::BestWins)]
    strategy: SelectionStrategy,

    /// Run the jobs serially on the calling thread.
    #[arg(long)]
    no_parallel: bool,

    /// Automatic temperature calibration (1) or manual temperatures (0).
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=1))]
    auto_temp: u8,

    /// Recalibration method while the window slides.
    #[arg(long, value_enum, default_value_t = AutoTempMethod::None)]
    auto_temp_method: AutoTempMethod,

    /// Starting temperature (requires --auto-temp 0).
    #[arg(long)]
    start_temp: Option<f64>,

    /// Ending temperature (requires --auto-temp 0).
    #[arg(long)]
    end_temp: Option<f64>,

    /// Temperature decay shape.
    #[arg(long, value_enum, default_value_t = ScheduleKind::Geometric)]
    schedule: ScheduleKind,

    /// Lineage log of a previous run.
    #[arg(long)]
    lineage_file: Option<PathBuf>,

    /// Reuse frames before N from --lineage-file and continue at frame N.
    #[arg(long, requires = "lineage_file")]
    continue_from: Option<usize>,

    /// Seed for every random stream (defaults to the clock).
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        let workers = self
            .workers
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        let seed = self.seed.unwrap_or_else(|| {
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0) % (1 << 32)
        });
        RunOptions {
            workers,
            jobs: self.jobs.unwrap_or(workers),
            keep: self.keep,
            strategy: self.strategy,
            seed,
            parallel: !self.no_parallel,
            cost_mode: if self.dist { CostMode::Distance } else { CostMode::Binary },
            temperature: TemperatureOptions {
                auto_temp: self.auto_temp == 1,
                start_temp: self.start_temp,
                end_temp: self.end_temp,
                method: self.auto_temp_method,
                schedule: self.schedule,
                ..Default::default()
            },
            debug_stride: self.debug.as_ref().map(|_| self.debug_stride),
            continue_from: self.continue_from,
            lineage_file: self.lineage_file.clone(),
        }
    }

    fn frame_range(&self) -> Result<FrameRange> {
        let last = match self.frame_last {
            -1 => None,
            n if n >= 0 => Some(n as usize),
            n => bail!("invalid --frame-last {}", n),
        };
        Ok(FrameRange { first: self.frame_first, last })
    }
}

/// Seed cells, or the committed prefix of a previous run.
fn initial_state(cli: &Cli, frames: &ImageSequence) -> Result<InitialState> {
    if let (Some(n), Some(path)) = (cli.continue_from, &cli.lineage_file) {
        if n <= frames.first_number() || n - frames.first_number() > frames.len() {
            bail!(
                "--continue-from {} must lie in ({}, {}]",
                n,
                frames.first_number(),
                frames.first_number() + frames.len()
            );
        }
        let names = &frames.file_names()[..n - frames.first_number()];
        let file = File::open(path).with_context(|| format!("failed to open lineage file {}", path.display()))?;
        let committed = read_committed(file, names)
            .with_context(|| format!("failed to read lineage file {}", path.display()))?;
        info!(frames = committed.len(), continue_from = n, "resuming from lineage file");
        return Ok(InitialState::Committed(committed));
    }
    let Some(path) = &cli.initial else {
        bail!("--initial is required unless --continue-from is given");
    };
    let file = File::open(path).with_context(|| format!("failed to open initial cells {}", path.display()))?;
    let cells = read_initial_cells(file).with_context(|| format!("failed to read initial cells {}", path.display()))?;
    info!(cells = cells.len(), file = %path.display(), "loaded initial cells");
    Ok(InitialState::Cells(cells))
}

/// Ask the driver to stop; the current window is discarded and committed
/// frames stay on disk.
fn on_interrupt(cancel: &AtomicBool) {
    if !cancel.swap(true, Ordering::Relaxed) {
        warn!("interrupt received, stopping the run");
    }
}

fn resume_hint(err: &RunError) -> Option<String> {
    err.last_committed().map(|last| format!("resume with --continue-from {}", last + 1))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config).with_context(|| format!("invalid config {}", cli.config.display()))?;
    let options = cli.run_options();
    options.validate().context("invalid command line options")?;
    info!(seed = options.seed, workers = options.workers, jobs = options.jobs, strategy = %options.strategy, "options");

    let frames = ImageSequence::discover(&cli.input, cli.frame_range()?, config.simulation.z_slices)
        .context("failed to discover input frames")?;
    // The previous log is read in full before the sink truncates the output.
    let initial = initial_state(&cli, &frames)?;

    let mut sink = FileSink::create(
        OutputDirs {
            output: cli.output.clone(),
            bestfit: cli.bestfit.clone(),
            residual: cli.residual.clone(),
            debug: cli.debug.clone(),
        },
        (config.residual_vmin, config.residual_vmax),
    )
    .context("failed to prepare output directories")?;

    let derived = config.derive(options.cost_mode);
    let driver = WindowDriver::new(derived, config.simulation.clone(), options)?;
    let cancel = driver.cancel_handle();
    ctrlc::set_handler(move || on_interrupt(&cancel)).context("failed to install interrupt handler")?;
    match driver.run(&frames, &mut sink, initial) {
        Ok(summary) => {
            info!(
                frames = summary.committed.len(),
                windows = summary.windows.len(),
                lineage = %sink.lineage_path().display(),
                "done"
            );
            Ok(())
        }
        Err(e) => {
            if let Some(hint) = resume_hint(&e) {
                error!(last_committed = ?e.last_committed(), "run stopped; {}", hint);
            }
            Err(e).context("run failed")
        }
    }
}
