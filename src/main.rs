//! layercheck CLI - run Qwen3 sublayer conformance scenarios

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use layercheck::fixture::{parse_shape, FixtureGenerator};
use layercheck::{analyze, HarnessConfig, Scenario, ScenarioDriver, DEFAULT_SEED, VERSION};

/// layercheck - compare candidate Qwen3 sublayers against a reference forward pass
#[derive(Parser, Debug)]
#[command(name = "layercheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Harness config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Reference checkpoint (file or shard directory)
    #[arg(long, global = true)]
    model_path: Option<PathBuf>,

    /// Decoder layer for the gate and MLP scenarios
    #[arg(long, global = true)]
    layer: Option<usize>,

    /// Keep scenario workspaces for inspection
    #[arg(long, global = true)]
    retain: bool,

    /// Candidate timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the final RMS normalization
    Norm {
        /// Candidate executable
        #[arg(long)]
        exe: Option<PathBuf>,

        /// Input shape as CSV (default: 1,<hidden>)
        #[arg(long)]
        shape: Option<String>,

        /// Override the checkpoint's epsilon
        #[arg(long)]
        epsilon: Option<f64>,
    },

    /// Check the MLP gate projection
    Gate {
        /// Candidate executable
        #[arg(long)]
        exe: Option<PathBuf>,
    },

    /// Check the full gated MLP
    Mlp {
        /// Candidate executable
        #[arg(long)]
        exe: Option<PathBuf>,

        /// Checkpoint handed to the candidate (default: model path)
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Candidate memory-maps the checkpoint
        #[arg(long)]
        mmap: bool,

        /// Candidate issues prefetch advice
        #[arg(long)]
        prefetch: bool,
    },

    /// Run every scenario, continuing past failures
    All,

    /// Compare two existing text fixtures
    Analyze {
        /// Reference output fixture
        reference: PathBuf,

        /// Candidate output fixture
        candidate: PathBuf,
    },

    /// Write a seeded random input fixture
    Generate {
        /// Shape as CSV, e.g. 1,2560
        #[arg(short, long)]
        shape: String,

        /// Output text fixture
        #[arg(short, long)]
        output: PathBuf,

        /// Random seed
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

fn create_progress_bar(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => HarnessConfig::default(),
    };
    if let Some(path) = &cli.model_path {
        config.model_path = path.clone();
    }
    if let Some(layer) = cli.layer {
        config.layer_index = layer;
    }
    if let Some(timeout) = cli.timeout {
        config.candidate_timeout_secs = timeout;
    }
    config.retain |= cli.retain;
    config.validate().context("Invalid option")?;
    Ok(config)
}

fn run_scenarios(config: HarnessConfig, scenarios: Vec<Scenario>) -> Result<()> {
    let pb = create_progress_bar(&format!("Running {} scenario(s)...", scenarios.len()));
    let driver = ScenarioDriver::new(config).with_progress(pb.clone());
    let results = driver.run_all(&scenarios);
    pb.finish_and_clear();

    let mut failures = 0;
    println!("\nSummary:");
    for (name, result) in &results {
        match result {
            Ok(outcome) => {
                if !outcome.verdict.passed() {
                    failures += 1;
                }
                println!("  {}", outcome.summary());
                if let Some(path) = &outcome.retained_at {
                    println!("    workspace retained at {:?}", path);
                }
            }
            Err(e) => {
                failures += 1;
                println!("  [ERROR] {} - {}", name, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} scenario(s) did not pass", failures, results.len());
    }
    info!("All {} scenario(s) passed", results.len());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    info!("layercheck v{}", VERSION);

    match &cli.command {
        Commands::Norm { exe, shape, epsilon } => {
            let mut config = load_config(&cli)?;
            if let Some(exe) = exe {
                config.candidates.norm = exe.clone();
            }
            if shape.is_some() {
                config.norm.shape = shape.clone();
            }
            if epsilon.is_some() {
                config.norm.epsilon = *epsilon;
            }
            config.validate().context("Invalid norm options")?;
            let scenario = Scenario::norm(&config)?;
            run_scenarios(config, vec![scenario])
        }

        Commands::Gate { exe } => {
            let mut config = load_config(&cli)?;
            if let Some(exe) = exe {
                config.candidates.gate = exe.clone();
            }
            let scenario = Scenario::gate(&config);
            run_scenarios(config, vec![scenario])
        }

        Commands::Mlp {
            exe,
            weights,
            mmap,
            prefetch,
        } => {
            let mut config = load_config(&cli)?;
            if let Some(exe) = exe {
                config.candidates.mlp = exe.clone();
            }
            if weights.is_some() {
                config.weights_source = weights.clone();
            }
            config.use_mmap |= *mmap;
            config.use_prefetch |= *prefetch;
            let scenario = Scenario::mlp(&config);
            run_scenarios(config, vec![scenario])
        }

        Commands::All => {
            let config = load_config(&cli)?;
            let scenarios = Scenario::all(&config)?;
            run_scenarios(config, scenarios)
        }

        Commands::Analyze {
            reference,
            candidate,
        } => {
            let report = analyze(reference, candidate).context("Comparison failed")?;
            println!("{}", report);
            Ok(())
        }

        Commands::Generate {
            shape,
            output,
            seed,
        } => {
            let shape = parse_shape(shape)?;
            let pb = create_progress_bar("Generating fixture...");
            let result = FixtureGenerator::new(*seed).generate_to(&shape, output);
            pb.finish_and_clear();
            match result {
                Ok(tensor) => {
                    info!("Wrote {} values to {:?}", tensor.numel(), output);
                    Ok(())
                }
                Err(e) => {
                    error!("Fixture generation failed: {}", e);
                    Err(e.into())
                }
            }
        }
    }
}
