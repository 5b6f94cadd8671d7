use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod clustering;
mod config;
mod error;
mod io;
mod matrix;
mod normalize;
mod pipeline;
mod plot;
mod sparse;
mod topology;

use clustering::ClusteringConfig;
use config::Config;
use matrix::{InteractionMatrix, ResidueSelection};
use normalize::Normalization;
use pipeline::{FilteredPair, PrepareOptions};
use topology::Topology;

/// Filter, compare and cluster residue-interaction fingerprints from
/// molecular dynamics replicates
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(short, long, global = true, value_name = "CONFIG.toml")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct SelectionArgs {
    /// Comma-separated 1-based residue numbers to keep
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["residue_set", "all"])]
    residues: Vec<i64>,

    /// Named residue set from the configuration file
    #[arg(long, value_name = "NAME", conflicts_with = "all")]
    residue_set: Option<String>,

    /// Keep every residue (the default when nothing else is given)
    #[arg(long)]
    all: bool,

    /// Topology (.pdb or .prmtop) mapping residue numbers to matrix labels
    #[arg(short, long, value_name = "TOPOLOGY")]
    topology: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep only the chosen residues of an interaction matrix
    Filter {
        /// Matrix to filter (.npy, .npz, .csv, .txt)
        #[arg(short, long, value_name = "INPUT")]
        input: PathBuf,

        /// Where to write the filtered matrix
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Filter two matrices to the same residues and write SECOND - FIRST
    Diff {
        #[arg(long, value_name = "FIRST")]
        first: PathBuf,

        #[arg(long, value_name = "SECOND")]
        second: PathBuf,

        /// Where to write the difference matrix
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Keep residues with at least one interaction outside a significance band
    Threshold {
        #[arg(short, long, value_name = "INPUT")]
        input: PathBuf,

        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Band half-width; derived from the data when omitted
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Normalize and k-means cluster the frames of every replicate
    Cluster {
        /// Replicate stack (.npy with 3 or 4 axes, or .npz of 3-D arrays)
        #[arg(short, long, value_name = "REPLICATES")]
        input: PathBuf,

        /// Cluster table archive to write
        #[arg(short, long, value_name = "TABLE.npz")]
        output: PathBuf,

        #[arg(short, long, value_enum)]
        normalization: Option<Normalization>,

        /// Number of clusters [default: 2 for zscore, 8 for whiten]
        #[arg(short = 'k', long)]
        clusters: Option<usize>,

        /// Random restarts; the lowest-distortion run is kept
        #[arg(long)]
        restarts: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Frames carry the residue label row and column
        #[arg(long)]
        labeled: bool,

        /// Keep feature columns that are zero in every frame
        /// [default for zscore]
        #[arg(long, conflicts_with = "drop_zero_columns")]
        keep_zero_columns: bool,

        /// Remove feature columns that are zero in every frame before
        /// normalizing [default for whiten]
        #[arg(long)]
        drop_zero_columns: bool,

        /// Also write an SVG of the per-frame assignments
        #[arg(long, value_name = "PLOT.svg")]
        plot: Option<PathBuf>,

        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Print a saved cluster table
    Inspect {
        #[arg(short, long, value_name = "TABLE.npz")]
        input: PathBuf,
    },
}

fn resolve_selection(args: &SelectionArgs, config: &Config) -> Result<ResidueSelection> {
    let residues = match (&args.residue_set, args.residues.is_empty()) {
        _ if args.all => return Ok(ResidueSelection::All),
        (Some(name), _) => config.residue_set(name)?.to_vec(),
        (None, false) => args.residues.clone(),
        (None, true) => return Ok(ResidueSelection::All),
    };

    let topology = args
        .topology
        .as_ref()
        .map(|path| {
            Topology::load(path).with_context(|| format!("failed to read topology {:?}", path))
        })
        .transpose()?;

    let selection = topology::selection_for(&residues, topology.as_ref());
    if let ResidueSelection::Labels(labels) = &selection {
        if labels.is_empty() {
            bail!("none of the requested residues are present in the topology");
        }
        info!(residues = labels.len(), "residue selection resolved");
    }
    Ok(selection)
}

fn load_matrix(path: &Path) -> Result<InteractionMatrix> {
    let array = io::load(path).with_context(|| format!("failed to read matrix {:?}", path))?;
    Ok(InteractionMatrix::new(array)?)
}

fn write_matrix(path: &Path, matrix: &InteractionMatrix) -> Result<()> {
    io::write_matrix(path, matrix.as_array())
        .with_context(|| format!("failed to write matrix {:?}", path))?;
    info!(path = %path.display(), shape = ?matrix.dim(), "wrote matrix");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("failed to read config {:?}", path))?
        }
        None => Config::default(),
    };

    match &cli.command {
        Commands::Filter {
            input,
            output,
            selection,
        } => {
            let selection = resolve_selection(selection, &config)?;
            let matrix = load_matrix(input)?;
            write_matrix(output, &matrix.filter_residues(&selection))?;
        }
        Commands::Diff {
            first,
            second,
            output,
            selection,
        } => {
            let selection = resolve_selection(selection, &config)?;
            let pair = FilteredPair::new(&load_matrix(first)?, &load_matrix(second)?, &selection)?;
            info!(
                first = ?pair.first.dim(),
                second = ?pair.second.dim(),
                "filtered matrices"
            );
            write_matrix(output, &pair.difference)?;
        }
        Commands::Threshold {
            input,
            output,
            threshold,
        } => {
            let matrix = load_matrix(input)?;
            let (filtered, _) = matrix.threshold_filter(*threshold);
            write_matrix(output, &filtered)?;
        }
        Commands::Cluster {
            input,
            output,
            normalization,
            clusters,
            restarts,
            seed,
            labeled,
            keep_zero_columns,
            drop_zero_columns,
            plot,
            selection,
        } => {
            let normalization = (*normalization)
                .or(config.normalization.strategy)
                .unwrap_or(Normalization::Zscore);
            let drop_zero_columns = match (*keep_zero_columns, *drop_zero_columns) {
                (true, _) => false,
                (_, true) => true,
                _ => config
                    .normalization
                    .drop_zero_columns
                    .unwrap_or_else(|| normalization.drops_zero_columns()),
            };

            let defaults = ClusteringConfig::default();
            let clustering_config = ClusteringConfig {
                clusters: (*clusters)
                    .or(config.clustering.clusters)
                    .unwrap_or_else(|| normalization.default_clusters()),
                restarts: (*restarts)
                    .or(config.clustering.restarts)
                    .unwrap_or(defaults.restarts),
                tolerance: config.clustering.tolerance.unwrap_or(defaults.tolerance),
                max_iterations: config
                    .clustering
                    .max_iterations
                    .unwrap_or(defaults.max_iterations),
                seed: (*seed).or(config.clustering.seed),
            };

            let options = PrepareOptions {
                labeled: *labeled,
                selection: resolve_selection(selection, &config)?,
                drop_zero_columns,
                normalization,
            };

            let replicates = io::load_replicates(input)
                .with_context(|| format!("failed to read replicates {:?}", input))?;
            let tables = pipeline::cluster(&replicates, &options, &clustering_config)?;

            io::save_cluster_tables(output, &tables)
                .with_context(|| format!("failed to write cluster tables {:?}", output))?;
            info!(path = %output.display(), replicates = tables.len(), "saved cluster tables");

            if let Some(plot_path) = plot {
                plot::plot_assignments(plot_path, &tables)
                    .with_context(|| format!("failed to plot assignments {:?}", plot_path))?;
            }
        }
        Commands::Inspect { input } => {
            let tables = io::load_cluster_tables(input)
                .with_context(|| format!("failed to read cluster tables {:?}", input))?;

            for (replicate, table) in tables.iter().enumerate() {
                println!(
                    "replicate {}: {} frames, distortion {:.6}",
                    replicate,
                    table.assignments.len(),
                    table.distortion
                );
                for ((label, centroid), size) in table.rows().zip(table.cluster_sizes()) {
                    println!(
                        "  cluster {}: {} frames, centroid dim {}",
                        label,
                        size,
                        centroid.len()
                    );
                }
            }
        }
    }

    Ok(())
}
