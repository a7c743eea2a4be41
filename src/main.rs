use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::ThreadPoolBuilder;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use palette_dither::{
    best_of_restarts, generate_points, mean_cut, ClusteringRun, ColorPalette, DataLoader,
    DistanceMetric, DitherError, PaletteConfig, PointSet, Result as DitherResult,
};

#[derive(Parser, Debug)]
#[command(name = "palette-dither")]
#[command(about = "Parallel k-means clustering with colour palette export", long_about = None)]
struct Args {
    /// Number of clusters [default: from --config, else 8]
    #[arg(short, long)]
    k: Option<usize>,

    /// Number of points to generate when not using --input
    #[arg(short = 'n', long, default_value_t = 100_000)]
    points: usize,

    /// Dimensionality of points when generating
    #[arg(short, long, default_value_t = 4)]
    dim: usize,

    /// Iteration cap per run [default: 100]
    #[arg(short, long)]
    iterations: Option<usize>,

    /// RNG seed [default: 42]
    #[arg(long)]
    seed: Option<u64>,

    /// Input dataset (CSV or Parquet)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Explicitly specify the input file format (default: auto-detect from extension)
    #[arg(long, value_enum)]
    format: Option<InputFormat>,

    /// Output file for centroids and stats (JSON)
    #[arg(short, long, default_value = "clustering_result.json")]
    output: PathBuf,

    /// Optional file containing per-point cluster assignments (CSV)
    #[arg(long)]
    assignments: Option<PathBuf>,

    /// Number of random restarts, best kept by total error [default: 3]
    #[arg(long)]
    restarts: Option<usize>,

    /// Convergence threshold in percent of the bounding-box distance [default: 0.01]
    #[arg(long)]
    accuracy: Option<f64>,

    /// Stable iterations in a row required to converge [default: 2]
    #[arg(long)]
    consecutive: Option<usize>,

    /// Distance metric: euclidean or red-mean [default: red-mean]
    #[arg(long, value_parser = parse_metric)]
    metric: Option<DistanceMetric>,

    /// Run restarts concurrently
    #[arg(long, default_value_t = false)]
    parallel_restarts: bool,

    /// Reduce the data to bucket means of a k-d tree of this depth first
    #[arg(long)]
    mean_cut_depth: Option<usize>,

    /// Write the centroids as a colour palette (JSON); needs 3 or 4 dimensions
    #[arg(long)]
    palette_out: Option<PathBuf>,

    /// Override Rayon global thread pool size
    #[arg(long)]
    threads: Option<usize>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbosity: set RUST_LOG style level (info, debug, warn)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum InputFormat {
    Csv,
    Parquet,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(&args.log_level) {
        eprintln!("failed to initialise logging: {err}");
    }

    if let Err(err) = run(args) {
        error!(error = %err, "clustering run failed");
        process::exit(1);
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(match level {
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|err| err.to_string())
}

fn run(args: Args) -> DitherResult<()> {
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|err| {
                DitherError::InvalidConfig(format!(
                    "failed to configure rayon threadpool: {err}"
                ))
            })?;
        info!(threads, "configured rayon global thread pool");
    }

    let config = resolve_config(&args)?;
    info!(
        k = config.k,
        metric = %config.metric,
        restarts = config.restarts.restarts,
        parallel_restarts = config.restarts.parallel,
        accuracy_percent = config.clustering.accuracy_percent,
        consecutive_stable = config.clustering.consecutive_stable,
        max_iterations = config.clustering.max_iterations,
        seed = config.seed,
        "starting kmeans clustering"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut points = load_data(
        args.input.as_deref(),
        args.format,
        args.points,
        args.dim,
        &mut rng,
    )?;
    let rows = points.len();
    if let Some(depth) = config.mean_cut_depth {
        points = mean_cut(points, depth)?;
        info!(depth, rows, reduced = points.len(), "applied mean-cut reduction");
    }

    let start = Instant::now();
    let run = best_of_restarts(
        &points,
        config.k,
        config.metric,
        &config.clustering,
        &config.restarts,
        &mut rng,
    )?;
    let elapsed = start.elapsed();
    info!(
        total_error = run.total_error,
        iterations = run.summary.iterations,
        converged = run.summary.converged,
        restart = run.restart,
        took_seconds = elapsed.as_secs_f64(),
        "kmeans clustering finished"
    );
    info!(?run.cluster_sizes, "cluster population counts");

    write_result(&args, &config, rows, &points, &run, elapsed.as_secs_f64())?;

    if let Some(path) = args.palette_out.as_ref() {
        let palette = ColorPalette::from_points("FromData", &run.centroids)?;
        palette.save_json(path, true)?;
        info!(path = ?path, colors = palette.len(), "saved colour palette");
    }

    if let Some(path) = args.assignments.as_ref() {
        write_assignments(path, &run)?;
    }

    Ok(())
}

/// Start from `--config` (or the defaults) and apply explicit flags on top.
fn resolve_config(args: &Args) -> DitherResult<PaletteConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => {
            info!(path = ?path, "loading configuration file");
            PaletteConfig::from_json_file(path)?
        }
        None => PaletteConfig::default(),
    };

    if let Some(k) = args.k {
        config.k = k;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(metric) = args.metric {
        config.metric = metric;
    }
    if let Some(depth) = args.mean_cut_depth {
        config.mean_cut_depth = Some(depth);
    }
    if let Some(restarts) = args.restarts {
        config.restarts.restarts = restarts;
    }
    if args.parallel_restarts {
        config.restarts.parallel = true;
    }
    if let Some(iterations) = args.iterations {
        config.clustering.max_iterations = iterations;
    }
    if let Some(accuracy) = args.accuracy {
        config.clustering.accuracy_percent = accuracy;
    }
    if let Some(consecutive) = args.consecutive {
        config.clustering.consecutive_stable = consecutive;
    }

    config.validate()?;
    Ok(config)
}

fn load_data(
    input: Option<&Path>,
    format: Option<InputFormat>,
    points: usize,
    dim: usize,
    rng: &mut ChaCha8Rng,
) -> DitherResult<PointSet> {
    if let Some(path) = input {
        let format_to_use =
            format.unwrap_or_else(|| infer_format(path).unwrap_or(InputFormat::Csv));
        info!(path = ?path, ?format_to_use, "loading input data");
        let matrix = match format_to_use {
            InputFormat::Csv => DataLoader::load_csv(path)?,
            InputFormat::Parquet => DataLoader::load_parquet(path)?,
        };
        Ok(PointSet::from_matrix(&matrix))
    } else {
        if let Some(requested) = format {
            info!(
                ?requested,
                "ignoring --format because synthetic data will be generated"
            );
        }
        info!(points, dim, "generating synthetic uniform data");
        Ok(generate_points(points, dim, rng))
    }
}

fn infer_format(path: &Path) -> Option<InputFormat> {
    path.extension().and_then(|ext| ext.to_str()).map(|ext| {
        match ext.to_ascii_lowercase().as_str() {
            "parquet" | "pq" => InputFormat::Parquet,
            _ => InputFormat::Csv,
        }
    })
}

fn write_result(
    args: &Args,
    config: &PaletteConfig,
    rows: usize,
    points: &PointSet,
    run: &ClusteringRun,
    elapsed_secs: f64,
) -> DitherResult<()> {
    let centroids: Vec<&[f64]> = run
        .centroids
        .iter()
        .map(|centroid| centroid.coords.as_slice())
        .collect();

    let dump = json!({
        "k": run.centroids.len(),
        "dim": points.dimension().unwrap_or(0),
        "rows": rows,
        "clustered_points": points.len(),
        "iterations": run.summary.iterations,
        "total_error": run.total_error,
        "converged": run.summary.converged,
        "stop_reason": run.summary.stop_reason,
        "reseeds": run.summary.reseeds,
        "cluster_sizes": run.cluster_sizes,
        "restart": run.restart,
        "restart_errors": run.restart_errors,
        "elapsed_seconds": elapsed_secs,
        "config": config,
        "centroids": centroids,
        "history": run.summary.history,
        "data_source": if let Some(path) = args.input.as_ref() {
            let fmt = args
                .format
                .or_else(|| infer_format(path))
                .unwrap_or(InputFormat::Csv);
            json!({
                "type": "file",
                "path": path.display().to_string(),
                "format": format!("{fmt:?}").to_lowercase(),
            })
        } else {
            json!({
                "type": "synthetic",
                "points": args.points,
                "dim": args.dim,
            })
        },
        "assignments_path": args.assignments.as_ref().map(|p| p.display().to_string()),
        "palette_path": args.palette_out.as_ref().map(|p| p.display().to_string()),
    });

    std::fs::write(&args.output, serde_json::to_string_pretty(&dump)?)?;
    info!(path = ?args.output, "wrote clustering summary");
    Ok(())
}

fn write_assignments(path: &Path, run: &ClusteringRun) -> DitherResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "cluster"])?;
    for (idx, cluster) in run.assignments.iter().enumerate() {
        writer.write_record([idx.to_string(), cluster.to_string()])?;
    }
    writer.flush()?;
    info!(path = ?path, "wrote assignments CSV");
    Ok(())
}

fn parse_metric(raw: &str) -> Result<DistanceMetric, String> {
    DistanceMetric::from_str(raw).map_err(|err| err.to_string())
}
