use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use fastoverlap::config::load_config_or_default;
use fastoverlap::logging::{init_logging, new_correlation_id};
use fastoverlap::{Aligner, HarmonicCoefficients, PointSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "overlap")]
#[command(about = "Permutation-invariant alignment of atomic clusters and periodic configurations")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args)]
struct PairArgs {
    /// First configuration (JSON point set)
    first: PathBuf,

    /// Second configuration (JSON point set)
    second: PathBuf,

    /// Periodic box edge lengths; spherical mode when omitted
    #[arg(long = "box", value_delimiter = ',', num_args = 3)]
    box_lengths: Option<Vec<f64>>,

    /// Also search improper alignments
    #[arg(long)]
    invert: bool,

    /// Write the JSON result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Best permutation without moving either configuration
    Hungarian {
        #[command(flatten)]
        pair: PairArgs,
    },

    /// Overlap search, assignment and local refinement
    Align {
        #[command(flatten)]
        pair: PairArgs,
    },

    /// Branch-and-bound search seeded with the aligned result
    Bnb {
        #[command(flatten)]
        pair: PairArgs,

        /// Maximum number of search nodes solved
        #[arg(short = 'n', long, default_value = "100")]
        niter: usize,
    },

    /// Summarize the harmonic coefficients of one configuration
    Coefficients {
        /// Configuration (JSON point set)
        input: PathBuf,

        #[arg(long = "box", value_delimiter = ',', num_args = 3)]
        box_lengths: Option<Vec<f64>>,
    },
}

/// On-disk point set: coordinates plus optional per-point type labels
#[derive(Debug, Deserialize)]
struct PointSetFile {
    positions: Vec<[f64; 3]>,
    #[serde(default)]
    labels: Option<Vec<u32>>,
}

#[derive(Debug, Serialize)]
struct CoefficientSummary {
    mode: &'static str,
    labels: Vec<u32>,
    counts: Vec<usize>,
    values: usize,
    l2_norm: f64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref().and_then(Path::to_str));
    let level = match cli.verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    };
    if let Some(level) = level {
        let logging = &mut config.logging;
        for field in [
            &mut logging.global_level,
            &mut logging.algorithm_level,
            &mut logging.pipeline_level,
            &mut logging.search_level,
        ] {
            *field = level.to_string();
        }
    }
    let _guard = init_logging(&config.logging)?;
    let run_id = new_correlation_id();
    tracing::debug!(%run_id, "Starting overlap run");

    match cli.command {
        Commands::Hungarian { pair } => {
            let (aligner, first, second) = prepare(&pair, &mut config)?;
            let result = aligner.hungarian(&first, &second)?;
            emit(&result, pair.output.as_deref())?;
        }
        Commands::Align { pair } => {
            let (aligner, first, second) = prepare(&pair, &mut config)?;
            let result = aligner.align(&first, &second)?;
            emit(&result, pair.output.as_deref())?;
        }
        Commands::Bnb { pair, niter } => {
            let (aligner, first, second) = prepare(&pair, &mut config)?;
            let outcome = aligner.branch_and_bound(&first, &second, niter)?;
            if !outcome.status.is_certified() {
                tracing::warn!(niter, "Result is an upper bound; increase --niter to certify");
            }
            emit(&outcome, pair.output.as_deref())?;
        }
        Commands::Coefficients { input, box_lengths } => {
            let aligner = Aligner::from_config(box_array(box_lengths.as_deref())?, &config)?;
            let points = load_point_set(&input)?;
            let coefficients = aligner.coefficients(&points)?;
            emit(&summarize(&coefficients), None)?;
        }
    }

    Ok(())
}

fn prepare(
    pair: &PairArgs,
    config: &mut fastoverlap::Config,
) -> anyhow::Result<(Aligner, PointSet, PointSet)> {
    config.alignment.invert |= pair.invert;
    let aligner = Aligner::from_config(box_array(pair.box_lengths.as_deref())?, config)?;
    let first = load_point_set(&pair.first)?;
    let second = load_point_set(&pair.second)?;
    Ok((aligner, first, second))
}

fn box_array(lengths: Option<&[f64]>) -> anyhow::Result<Option<[f64; 3]>> {
    match lengths {
        None => Ok(None),
        Some([x, y, z]) => Ok(Some([*x, *y, *z])),
        Some(other) => bail!("--box needs exactly three lengths, got {}", other.len()),
    }
}

fn load_point_set(path: &Path) -> anyhow::Result<PointSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading point set {}", path.display()))?;
    let file: PointSetFile = serde_json::from_str(&content)
        .with_context(|| format!("parsing point set {}", path.display()))?;
    let labels = file.labels.unwrap_or_else(|| vec![0; file.positions.len()]);
    Ok(PointSet::from_coords(&file.positions, labels)?)
}

fn summarize(coefficients: &HarmonicCoefficients) -> CoefficientSummary {
    let l2_norm = match coefficients {
        HarmonicCoefficients::Periodic(c) => c.data.iter().map(|z| z.norm_sqr()).sum::<f64>(),
        HarmonicCoefficients::Spherical(c) => c.data.iter().map(|z| z.norm_sqr()).sum::<f64>(),
    }
    .sqrt();
    CoefficientSummary {
        mode: coefficients.mode(),
        labels: coefficients.labels().to_vec(),
        counts: coefficients.counts().to_vec(),
        values: coefficients.len(),
        l2_norm,
    }
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing results to {}", path.display()))?;
            tracing::info!(path = %path.display(), "Results saved");
        }
        None => println!("{}", json),
    }
    Ok(())
}
