use anyhow::Context;
use civic_priority::{
    config::Config,
    ml::{ArtifactStore, InferenceEngine, TrainingOrchestrator},
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "civic-priority-cli")]
#[command(about = "Civic issue priority training and scoring", long_about = None)]
#[command(version)]
struct Cli {
    /// Artifact root (overrides artifacts.root)
    #[arg(short, long, global = true, env = "CIVIC_PRIORITY_ARTIFACTS")]
    artifacts: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train every candidate on a labeled CSV and persist the artifacts
    Train {
        /// Raw dataset with short_description, category, location, admin_priority
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Predict the priority of a single issue
    Predict {
        #[arg(short, long)]
        description: String,

        #[arg(short, long)]
        category: String,

        #[arg(short, long)]
        location: String,

        /// Model artifact name (defaults to serving.model_name)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Score every row of a CSV file
    #[command(name = "predict-csv")]
    PredictCsv {
        #[arg(short, long)]
        input: PathBuf,

        /// Write the scored table here
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show the metadata of the last training run
    Summary,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(root) = cli.artifacts {
        config.artifacts.root = root;
    }

    init_tracing(config.observability.json_logs);

    let store = ArtifactStore::new(&config.artifacts.root);

    match cli.command {
        Commands::Train { data } => {
            let orchestrator = TrainingOrchestrator::new(config.training.clone(), store);
            let summary = orchestrator
                .run(&data)
                .with_context(|| format!("Training run on {} failed", data.display()))?;

            println!("Run {} complete", summary.run_id);
            for (name, accuracy) in &summary.per_model_accuracy {
                println!("  {:<22} {:.4}", name, accuracy);
            }
            for (name, reason) in &summary.failed_candidates {
                println!("  {:<22} FAILED: {}", name, reason);
            }
            println!(
                "Best model: {} ({:.4})",
                summary.best_model_name,
                summary.best_accuracy()
            );
            println!("Artifacts written to: {}", config.artifacts.root.display());
        }

        Commands::Predict {
            description,
            category,
            location,
            model,
        } => {
            let model_name = model.unwrap_or(config.serving.model_name);
            let bound = InferenceEngine::new(store)
                .load(&model_name)
                .with_context(|| format!("Failed to load model {}", model_name))?;

            let request = json!({
                "short_description": description,
                "category": category,
                "location": location,
            });
            let fields = request
                .as_object()
                .cloned()
                .context("Request is not a JSON object")?;

            let outcome = bound
                .predict(&[fields])?
                .into_iter()
                .next()
                .context("Model returned no prediction")?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::PredictCsv {
            input,
            output,
            model,
        } => {
            let model_name = model.unwrap_or(config.serving.model_name);
            let bound = InferenceEngine::new(store)
                .load(&model_name)
                .with_context(|| format!("Failed to load model {}", model_name))?;

            let scored = InferenceEngine::predict_csv(&bound, &input, output.as_deref())
                .with_context(|| format!("Failed to score {}", input.display()))?;

            println!("Scored {} rows with {}", scored.rows.len(), model_name);
            match output {
                Some(path) => println!("Results written to: {}", path.display()),
                None => {
                    let mut writer = csv::Writer::from_writer(std::io::stdout());
                    writer.write_record(&scored.headers)?;
                    for row in &scored.rows {
                        writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
                    }
                    writer.flush()?;
                }
            }
        }

        Commands::Summary => {
            let summary = store
                .load_run_summary()
                .context("No training run found; run `train` first")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "civic_priority=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
