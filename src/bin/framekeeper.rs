//! Framekeeper CLI
//!
//! Inspect configuration and run small file pipelines from the shell.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use framekeeper::{
    CsvLoader, Dataset, DatasetLoader, JsonLoader, JsonRowSchema, NodeBuilder, ParentSet, Pipeline,
    PipelineConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "framekeeper")]
#[command(about = "Lazy, cached tabular data pipelines")]
struct Cli {
    /// Config file to load (optional)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// View and create configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Stack CSV/JSON files into one table
    Concat {
        /// Input files (.csv, .tsv, .json, .jsonl)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// JSON Schema every output row must satisfy
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Output file (JSON records); stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the pipeline as GraphViz DOT instead of running it
        #[arg(long)]
        dot: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show {
        /// Output as TOML
        #[arg(long)]
        toml: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new config file
    Init {
        /// Output path
        #[arg(short, long, default_value = "framekeeper.toml")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { action } => run_config(action, &config),
        Commands::Concat {
            files,
            schema,
            output,
            dot,
        } => run_concat(config, &files, schema.as_deref(), output.as_deref(), dot),
    }
}

fn run_config(action: ConfigAction, cfg: &PipelineConfig) -> Result<()> {
    match action {
        ConfigAction::Show { toml, json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(cfg)?);
            } else if toml {
                println!("{}", ::toml::to_string_pretty(cfg)?);
            } else {
                println!("Framekeeper Configuration\n");
                println!("Cache:");
                println!("  Policy: {:?}", cfg.cache.policy);
                println!("  Dir: {}", cfg.cache_dir().display());

                println!("\nLoader:");
                println!("  Delimiter: {:?}", cfg.loader.delimiter);
                println!("  Headers: {}", cfg.loader.has_headers);
                println!("  Infer types: {}", cfg.loader.infer_types);

                println!("\nLogging:");
                println!("  Filter: {}", cfg.logging.filter);
            }
        }

        ConfigAction::Init { output } => {
            if Path::new(&output).exists() {
                bail!("{} already exists", output);
            }
            PipelineConfig::default().save(&output)?;
            println!("Created config file: {}", output);
        }
    }
    Ok(())
}

fn run_concat(
    config: PipelineConfig,
    files: &[PathBuf],
    schema: Option<&Path>,
    output: Option<&Path>,
    dot: bool,
) -> Result<()> {
    let mut pipeline = Pipeline::with_config(config);

    let mut parents = ParentSet::new();
    for path in files {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let builder = loader_for(path, pipeline.config(), label)?;
        parents = parents.positional(pipeline.add_node(builder)?);
    }

    let mut combiner = NodeBuilder::combiner("concat", |inputs, _named| {
        Ok(inputs
            .iter()
            .fold(Dataset::default(), |acc, next| acc.concat(next)))
    });
    if let Some(schema) = schema {
        let validator = JsonRowSchema::from_file(schema)
            .with_context(|| format!("loading schema {}", schema.display()))?;
        combiner = combiner.output_validator(validator.shared());
    }
    let sink = pipeline.add_node(combiner)?;
    pipeline.connect_parents(sink, parents)?;

    if dot {
        print!("{}", pipeline.to_dot());
        return Ok(());
    }

    let data = pipeline.extract_data(sink)?;
    info!(files = files.len(), rows = data.row_count(), "concatenated");

    let rendered = serde_json::to_string_pretty(&data.to_records())?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} rows to {}", data.row_count(), path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn loader_for(path: &Path, config: &PipelineConfig, label: String) -> Result<NodeBuilder> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let builder = match extension.as_deref() {
        Some("json") | Some("jsonl") => JsonLoader::new(path).into_node(label),
        Some("csv") => CsvLoader::from_config(path, config).into_node(label),
        Some("tsv") => CsvLoader::from_config(path, config)
            .delimiter(b'\t')
            .into_node(label),
        _ => bail!("unsupported input file {}", path.display()),
    };
    Ok(builder)
}
