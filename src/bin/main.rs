//! GP-HIK Command Line Interface
//!
//! A command-line interface for training, evaluating, updating and using
//! GP-HIK models with LibSVM data files.

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use gphik::api::{quick, GpHik, TrainedModel};
use gphik::core::{
    GpHikConfig, GpHikError, OptimizationMethod, QuantizationConfig, Result, VarianceMethod,
};
use gphik::kernel::ParameterizedTransform;
use gphik::persistence::SerializableModel;
use gphik::utils::stats::{feature_frequency, sparse_vector_stats};
use gphik::utils::validation::class_counts;
use gphik::{Dataset, LibSVMDataset};
use log::{debug, error, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "gphik")]
#[command(about = "Gaussian process classification with histogram intersection kernels")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new model
    Train(TrainArgs),
    /// Classify examples using a trained model
    Classify(ClassifyArgs),
    /// Evaluate a model on labeled data
    Evaluate(EvaluateArgs),
    /// Add labeled examples to a trained model
    Add(AddArgs),
    /// Display model information
    Info(InfoArgs),
    /// Quick operations without model saving
    Quick(QuickArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Training data file (LibSVM format)
    #[arg(long)]
    data: PathBuf,

    /// Output model file
    #[arg(short, long)]
    output: PathBuf,

    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hyperparameter search strategy
    #[arg(long)]
    optimization: Option<CliOptimization>,

    /// Grid step of the greedy search
    #[arg(long)]
    step_size: Option<f64>,

    /// Feature transform
    #[arg(long)]
    transform: Option<CliTransform>,

    /// Lower bound of the transform parameters
    #[arg(long)]
    lower_bound: Option<f64>,

    /// Upper bound of the transform parameters
    #[arg(long)]
    upper_bound: Option<f64>,

    /// Noise added to the kernel diagonal
    #[arg(long)]
    noise: Option<f64>,

    /// Search the noise together with the transform parameters
    #[arg(long)]
    optimize_noise: bool,

    /// Number of quantization bins for lookup-table classification
    #[arg(long)]
    quantization_bins: Option<usize>,

    /// Eigenpairs used by the fine variance estimate
    #[arg(long)]
    variance_rank: Option<usize>,

    /// Treat labels as real-valued regression targets
    #[arg(long)]
    regression: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliOptimization {
    /// Likelihood on a regular grid
    #[value(name = "greedy")]
    Greedy,
    /// Downhill simplex on the likelihood
    #[value(name = "simplex")]
    Simplex,
    /// Keep the configured parameters
    #[value(name = "none")]
    None,
}

impl From<CliOptimization> for OptimizationMethod {
    fn from(cli_method: CliOptimization) -> Self {
        match cli_method {
            CliOptimization::Greedy => OptimizationMethod::default(),
            CliOptimization::Simplex => OptimizationMethod::downhill_simplex(),
            CliOptimization::None => OptimizationMethod::None,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliTransform {
    /// f(x) = x
    #[value(name = "identity")]
    Identity,
    /// f(x) = x^p
    #[value(name = "power")]
    Power,
    /// f(x) = exp(βx) - 1
    #[value(name = "exponential")]
    Exponential,
}

impl From<CliTransform> for ParameterizedTransform {
    fn from(cli_transform: CliTransform) -> Self {
        match cli_transform {
            CliTransform::Identity => ParameterizedTransform::Identity,
            CliTransform::Power => ParameterizedTransform::Power { exponent: 1.0 },
            CliTransform::Exponential => ParameterizedTransform::Exponential { rate: 1.0 },
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliVariance {
    #[value(name = "rough")]
    Rough,
    #[value(name = "fine")]
    Fine,
    #[value(name = "exact")]
    Exact,
}

impl From<CliVariance> for VarianceMethod {
    fn from(cli_variance: CliVariance) -> Self {
        match cli_variance {
            CliVariance::Rough => VarianceMethod::Rough,
            CliVariance::Fine => VarianceMethod::Fine,
            CliVariance::Exact => VarianceMethod::Exact,
        }
    }
}

#[derive(Args)]
struct ClassifyArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Input data file (labels are ignored)
    #[arg(long)]
    data: PathBuf,

    /// Output file (optional, prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Show the score of every class
    #[arg(long)]
    scores: bool,

    /// Also report the predictive variance
    #[arg(long)]
    variance: Option<CliVariance>,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Labeled test data file
    #[arg(long)]
    data: PathBuf,
}

#[derive(Args)]
struct AddArgs {
    /// Trained model file
    #[arg(short, long)]
    model: PathBuf,

    /// Labeled examples to add
    #[arg(long)]
    data: PathBuf,

    /// Output model file
    #[arg(short, long)]
    output: PathBuf,

    /// Re-run the hyperparameter search
    #[arg(long)]
    reoptimize: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    model: PathBuf,
}

#[derive(Args)]
struct QuickArgs {
    #[command(subcommand)]
    operation: QuickOperation,
}

#[derive(Subcommand)]
enum QuickOperation {
    /// Quick train and evaluate with train/test split
    Eval {
        /// Training data file
        train: PathBuf,
        /// Test data file
        test: PathBuf,
    },
    /// Sequential split validation on a single dataset
    Cv {
        /// Data file
        data: PathBuf,
        /// Training ratio (0.0-1.0)
        #[arg(short, long, default_value = "0.8")]
        ratio: f64,
        /// Noise added to the kernel diagonal
        #[arg(long, default_value = "0.01")]
        noise: f64,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Classify(args) => classify_command(args),
        Commands::Evaluate(args) => evaluate_command(args),
        Commands::Add(args) => add_command(args),
        Commands::Info(args) => info_command(args),
        Commands::Quick(args) => quick_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<GpHikConfig> {
    let file = File::open(path).map_err(GpHikError::IoError)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| GpHikError::ParseError(format!("configuration {path:?}: {e}")))
}

fn build_config(args: &TrainArgs) -> Result<GpHikConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GpHikConfig::default(),
    };

    if let Some(method) = args.optimization {
        config.optimization = method.into();
    }
    if let Some(step_size) = args.step_size {
        config.optimization = OptimizationMethod::Greedy { step_size };
    }
    if let Some(transform) = args.transform {
        config.transform = transform.into();
    }
    if let Some(lower) = args.lower_bound {
        config.parameter_lower_bound = lower;
    }
    if let Some(upper) = args.upper_bound {
        config.parameter_upper_bound = upper;
    }
    if let Some(noise) = args.noise {
        config.noise = noise;
    }
    if args.optimize_noise {
        config.optimize_noise = true;
    }
    if let Some(bins) = args.quantization_bins {
        config.quantization = Some(QuantizationConfig {
            bins,
            upper_bound: None,
        });
    }
    if let Some(rank) = args.variance_rank {
        config.variance_rank = rank;
    }
    if args.regression {
        config.performs_regression = true;
    }

    config.validate()?;
    Ok(config)
}

fn load_model(path: &Path) -> Result<(SerializableModel, TrainedModel)> {
    info!("Loading model from: {path:?}");
    let serializable = SerializableModel::load_from_file(path)?;
    let model = serializable.to_trained_model()?;
    Ok((serializable, model))
}

fn train_command(args: TrainArgs) -> Result<()> {
    info!("Training GP-HIK model...");
    info!("Data file: {:?}", args.data);

    let config = build_config(&args)?;
    info!(
        "Parameters: transform={}, optimization={}, noise={}",
        config.transform.name(),
        config.optimization.name(),
        config.noise
    );

    let dataset = LibSVMDataset::from_file(&args.data)?;
    info!(
        "Loaded {} samples with {} dimensions",
        dataset.len(),
        dataset.dim()
    );
    let stats = sparse_vector_stats(dataset.samples());
    info!(
        "Non-zeros per sample: mean {:.1}, range {}..={}; largest value {}",
        stats.mean_nnz, stats.min_nnz, stats.max_nnz, stats.max_value
    );
    debug!(
        "{} of {} dimensions are non-zero somewhere",
        feature_frequency(dataset.samples()).len(),
        dataset.dim()
    );
    if !config.performs_regression {
        for (class, count) in class_counts(&dataset)? {
            info!("Class {class}: {count} samples");
        }
    }

    let model = GpHik::with_config(config).train(&dataset)?;
    info!("Training completed successfully");

    let info = model.info();
    info!("Transform parameters: {:?}", info.parameters);
    info!("Noise: {:.6e}", info.noise);
    if let Some(report) = model.search_report() {
        info!(
            "Search: {} evaluations, {:?}",
            report.evaluations, report.termination
        );
    }

    let serializable = SerializableModel::from_trained_model(&model);
    serializable.save_to_file(&args.output)?;
    info!("Model saved to: {:?}", args.output);

    // Quick evaluation on training data
    if info.regression {
        let mse = model.mean_squared_error(&dataset)?;
        info!("Training MSE: {mse:.6}");
    } else {
        let metrics = model.evaluate(&dataset)?;
        info!("Training accuracy: {:.2}%", metrics.accuracy() * 100.0);
    }

    Ok(())
}

fn classify_command(args: ClassifyArgs) -> Result<()> {
    let (_, model) = load_model(&args.model)?;

    info!("Loading data from: {:?}", args.data);
    let dataset = LibSVMDataset::from_file(&args.data)?;
    let regression = model.info().regression;
    let variance = args.variance.map(VarianceMethod::from);

    let mut lines = Vec::with_capacity(dataset.len());
    for (i, sample) in dataset.samples().iter().enumerate() {
        let mut line = if regression {
            format!("{i} {:.6}", model.regress(&sample.features)?)
        } else {
            let result = model.classify(&sample.features)?;
            let mut line = format!("{i} {}", result.class);
            if args.scores {
                for (class, score) in &result.scores {
                    line.push_str(&format!(" {class}:{score:.6}"));
                }
            }
            line
        };
        if let Some(method) = variance {
            line.push_str(&format!(" {:.6}", model.variance(method, &sample.features)?));
        }
        lines.push(line);
    }

    let header = format!(
        "# Format: sample_index {}{}{}",
        if regression { "mean" } else { "class" },
        if args.scores && !regression {
            " class:score..."
        } else {
            ""
        },
        if variance.is_some() { " variance" } else { "" }
    );

    // Output results
    if let Some(output_path) = args.output {
        let file = File::create(&output_path).map_err(GpHikError::IoError)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# Predictions for {} samples", lines.len())?;
        writeln!(writer, "{header}")?;
        for line in &lines {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        info!("Predictions saved to: {output_path:?}");
    } else {
        println!("# Predictions for {} samples", lines.len());
        println!("{header}");
        for line in &lines {
            println!("{line}");
        }
    }

    Ok(())
}

fn evaluate_command(args: EvaluateArgs) -> Result<()> {
    let (serializable, model) = load_model(&args.model)?;

    info!("Loading test data from: {:?}", args.data);
    let dataset = LibSVMDataset::from_file(&args.data)?;

    println!("=== Model Evaluation ===");
    serializable.print_summary();
    println!("\nTest Results:");

    if serializable.metadata.regression {
        let mse = model.mean_squared_error(&dataset)?;
        println!("  Samples: {}", dataset.len());
        println!("  Mean Squared Error: {mse:.6}");
        return Ok(());
    }

    let metrics = model.evaluate(&dataset)?;
    println!("  Samples: {}", metrics.total);
    println!("  Accuracy: {:.2}%", metrics.accuracy() * 100.0);
    println!("  Average Recall: {:.2}%", metrics.average_recall() * 100.0);
    println!("\nPer-Class Results:");
    println!("  class  support  predicted  correct  recall");
    for (class, counts) in &metrics.per_class {
        println!(
            "  {:>5}  {:>7}  {:>9}  {:>7}  {:.4}",
            class,
            counts.support,
            counts.predicted,
            counts.correct,
            metrics.recall(*class)
        );
    }

    Ok(())
}

fn add_command(args: AddArgs) -> Result<()> {
    let (_, mut model) = load_model(&args.model)?;

    info!("Loading new examples from: {:?}", args.data);
    let dataset = LibSVMDataset::from_file(&args.data)?;
    let before = model.info();

    model.add_dataset(&dataset, args.reoptimize)?;

    let after = model.info();
    info!(
        "Added {} examples ({} -> {}), classes {:?} -> {:?}",
        dataset.len(),
        before.n_examples,
        after.n_examples,
        before.classes,
        after.classes
    );

    SerializableModel::from_trained_model(&model).save_to_file(&args.output)?;
    info!("Model saved to: {:?}", args.output);
    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    let (serializable, model) = load_model(&args.model)?;
    serializable.print_summary();

    let info = model.info();
    let engine = model.inner();
    println!("\nModel Details:");
    println!("  Dimensions: {}", info.n_dims);
    println!("  Binary: {}", info.binary);
    println!("  Optimization: {}", engine.config().optimization.name());
    println!("  Class Tables: {}", engine.class_tables().len());
    match info.quantization_bins {
        Some(bins) => println!("  Lookup Tables: {bins} bins per dimension"),
        None => println!("  Lookup Tables: disabled"),
    }

    let eigen = engine.eigen_approximation();
    if !eigen.is_empty() {
        let values: Vec<String> = eigen.values.iter().map(|v| format!("{v:.6}")).collect();
        println!("  Eigenvalues: {}", values.join(", "));
    }

    Ok(())
}

fn quick_command(args: QuickArgs) -> Result<()> {
    match args.operation {
        QuickOperation::Eval { train, test } => {
            info!("Quick evaluation: train on {train:?}, test on {test:?}");
            let accuracy = quick::evaluate_split(&train, &test)?;

            println!("=== Quick Evaluation Results ===");
            println!("Training file: {train:?}");
            println!("Test file: {test:?}");
            println!("Test accuracy: {:.2}%", accuracy * 100.0);
            Ok(())
        }
        QuickOperation::Cv { data, ratio, noise } => {
            info!("Split validation on {data:?} with ratio {ratio}");
            let dataset = LibSVMDataset::from_file(&data)?;
            let accuracy =
                quick::simple_validation(&dataset, ratio, GpHik::new().with_noise(noise))?;

            println!("=== Split Validation Results ===");
            println!("Data file: {data:?}");
            println!("Train/test ratio: {ratio:.1}/{:.1}", 1.0 - ratio);
            println!("Noise: {noise}");
            println!("Accuracy: {:.2}%", accuracy * 100.0);
            Ok(())
        }
    }
}
