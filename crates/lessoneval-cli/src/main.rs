//! lessoneval - Multi-provider lesson plan evaluation CLI
//!
//! ## Commands
//!
//! - `evaluate`: Score a lesson plan against the rubric
//! - `history`: List, show, delete and summarize stored evaluations
//! - `rubric`: Show the active rubric or validate a rubric file
//! - `inspect`: Run structural diagnostics on a lesson plan
//! - `providers`: Show configured providers and whether each is usable

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

use lessoneval_core::{
    inspect_lesson, EvaluationMode, EvaluationRequest, EvaluationStatus, Rubric,
};
use lessoneval_runtime::{
    EvaluationOptions, EvaluationOrchestrator, MemoryResultStore, OrchestratorError,
    PromptLibrary, ProviderRegistry, ResultStore, RuntimeConfig, SqliteResultStore,
};

mod output;
mod telemetry;

#[derive(Parser)]
#[command(name = "lessoneval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate lesson plans against a weighted rubric with several LLM providers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Runtime configuration file (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Rubric file (YAML or JSON); defaults to the built-in rubric
    #[arg(long, global = true)]
    rubric: Option<PathBuf>,

    /// Directory of `<name>.txt` prompt templates overriding the built-ins
    #[arg(long, global = true)]
    prompts: Option<PathBuf>,

    /// SQLite database for results; defaults to an in-memory store
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Use the offline mock provider for every provider
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a lesson plan
    Evaluate {
        /// Lesson plan text file
        #[arg(short, long)]
        file: PathBuf,

        /// Lesson title (default: file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Grade or year level
        #[arg(short, long, default_value = "")]
        grade: String,

        /// Subject area
        #[arg(short, long, default_value = "")]
        subject: String,

        /// Route every dimension to this provider id
        #[arg(short, long)]
        provider: Option<String>,

        /// Run the cross-review and moderator consensus pass
        #[arg(long)]
        debate: bool,

        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stored evaluations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Rubric tools
    Rubric {
        #[command(subcommand)]
        action: RubricAction,
    },

    /// Show configured providers and whether each can take calls
    Providers,

    /// Check a lesson plan's structure without calling any provider
    Inspect {
        /// Lesson plan text file
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List evaluations, newest first
    List {
        /// Only evaluations with this status (pending, completed, failed)
        #[arg(long)]
        status: Option<EvaluationStatus>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one evaluation
    Show {
        id: Uuid,

        #[arg(long)]
        json: bool,
    },

    /// Delete one evaluation
    Delete { id: Uuid },

    /// Aggregate statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RubricAction {
    /// Print the active rubric
    Show {
        #[arg(long)]
        json: bool,
    },

    /// Validate a rubric file
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    telemetry::init_tracing(cli.log_json, level);

    match &cli.command {
        Commands::Evaluate {
            file,
            title,
            grade,
            subject,
            provider,
            debate,
            json,
        } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read lesson plan {}", file.display()))?;
            let title = title.clone().unwrap_or_else(|| file_title(file));
            let request = EvaluationRequest::new(title, content)
                .with_grade_level(grade.clone())
                .with_subject_area(subject.clone());

            let mut options = EvaluationOptions::default();
            if let Some(provider) = provider {
                options = options.with_provider(provider.clone());
            }
            if *debate {
                options = options.with_mode(EvaluationMode::Debate);
            }

            let orchestrator = build_orchestrator(&cli)?;
            let record = match orchestrator.run(request, options).await {
                Ok(record) => record,
                Err(OrchestratorError::Persist { record, source }) => {
                    tracing::error!(evaluation_id = %record.id, error = %source, "Result not saved");
                    eprintln!("warning: result not saved: {}", source);
                    *record
                }
                Err(e) => return Err(e.into()),
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print!("{}", output::record_summary(&record));
            }

            if record.status == EvaluationStatus::Failed {
                return Ok(ExitCode::from(2));
            }
        }

        Commands::History { action } => {
            let rubric = load_rubric(&cli)?;
            let store = open_store(&cli, &rubric)?;
            if cli.db.is_none() {
                eprintln!("note: no --db given, history is empty for the in-memory store");
            }

            match action {
                HistoryAction::List { status, limit } => {
                    let records = match status {
                        Some(status) => store.list_by_status(*status, *limit).await?,
                        None => store.list(*limit).await?,
                    };
                    if records.is_empty() {
                        println!("No evaluations found.");
                    }
                    for record in &records {
                        println!("{}", output::record_line(record));
                    }
                }
                HistoryAction::Show { id, json } => {
                    let Some(record) = store.get(*id).await? else {
                        bail!("Evaluation not found: {}", id);
                    };
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    } else {
                        print!("{}", output::record_summary(&record));
                    }
                }
                HistoryAction::Delete { id } => {
                    if !store.delete(*id).await? {
                        bail!("Evaluation not found: {}", id);
                    }
                    println!("Deleted {}", id);
                }
                HistoryAction::Stats { json } => {
                    let stats = store.statistics().await?;
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    } else {
                        print!("{}", output::statistics(&stats));
                    }
                }
            }
        }

        Commands::Rubric { action } => match action {
            RubricAction::Show { json } => {
                let rubric = load_rubric(&cli)?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&rubric)?);
                } else {
                    print!("{}", output::rubric(&rubric));
                }
            }
            RubricAction::Validate { file } => match Rubric::from_file(file) {
                Ok(rubric) => {
                    println!(
                        "✓ {} is valid: {} dimensions, weights sum to {:.2}",
                        file.display(),
                        rubric.dimensions.len(),
                        rubric.total_weight()
                    );
                }
                Err(e) => {
                    eprintln!("✗ {} is invalid: {}", file.display(), e);
                    return Ok(ExitCode::FAILURE);
                }
            },
        },

        Commands::Providers => {
            let orchestrator = build_orchestrator(&cli)?;
            print!(
                "{}",
                output::providers(&orchestrator, &ProviderRegistry::builtin())
            );
        }

        Commands::Inspect { file, json } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read lesson plan {}", file.display()))?;
            let diagnostics = inspect_lesson(&content);
            if *json {
                println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            } else {
                print!("{}", output::diagnostics(&diagnostics));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_else(|| "Untitled lesson".to_string())
}

fn load_rubric(cli: &Cli) -> Result<Rubric> {
    match &cli.rubric {
        Some(path) => Rubric::from_file(path)
            .with_context(|| format!("Failed to load rubric {}", path.display())),
        None => Ok(Rubric::builtin()),
    }
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid configuration from environment")?;
    if cli.mock {
        config.use_mock();
    }
    Ok(config)
}

fn open_store(cli: &Cli, rubric: &Rubric) -> Result<Arc<dyn ResultStore>> {
    Ok(match &cli.db {
        Some(path) => Arc::new(
            SqliteResultStore::open(path)
                .with_context(|| format!("Failed to open database {}", path.display()))?
                .with_aliases(rubric.aliases.clone()),
        ),
        None => Arc::new(MemoryResultStore::new().with_aliases(rubric.aliases.clone())),
    })
}

fn build_orchestrator(cli: &Cli) -> Result<EvaluationOrchestrator> {
    let rubric = load_rubric(cli)?;
    let config = load_config(cli)?;

    let mut prompts = PromptLibrary::builtin();
    if let Some(dir) = &cli.prompts {
        let loaded = prompts
            .load_dir(dir)
            .with_context(|| format!("Failed to load prompts from {}", dir.display()))?;
        tracing::info!(count = loaded, dir = %dir.display(), "Loaded prompt templates");
    }

    let store = open_store(cli, &rubric)?;

    let orchestrator = EvaluationOrchestrator::builder()
        .rubric(rubric)
        .config(config)
        .prompts(prompts)
        .store(store)
        .build()?;
    tracing::debug!(providers = ?orchestrator.available_providers(), "Orchestrator ready");
    Ok(orchestrator)
}
