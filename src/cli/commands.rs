//! CLI command definitions for search-curator.
//!
//! Every command opens the SQLite database first. Commands that run jobs
//! (`recover`, `recommend`) boot the task manager, failing tasks interrupted
//! by a previous run; read-only commands leave task records untouched.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use uuid::Uuid;

use crate::batch::{
    BatchJob, BatchScrollProcessor, MemoryScrollSource, RecommendationStore, ScrollQuery,
    SqliteRecommendationStore,
};
use crate::config::CuratorConfig;
use crate::jobs::{
    DictionaryRecommendationJob, QueryGenerationJob, RecommendationRunner,
    SynonymRecommendationJob,
};
use crate::llm::LiteLlmClient;
use crate::scheduler::WorkerPool;
use crate::error::TaskError;
use crate::tasks::{SqliteTaskStore, TaskManager, TaskStore, TaskType};

/// Admin backend for Korean search dictionaries and synonym sets.
#[derive(Parser)]
#[command(name = "search-curator")]
#[command(about = "LLM-assisted dictionary, synonym and query curation for Korean search")]
#[command(version)]
#[command(
    long_about = "search-curator scrolls a document export, batches documents into LLM prompts \
    and accumulates the suggested synonyms, dictionary words or test queries.\n\n\
    Example usage:\n  search-curator recommend synonym --input products.jsonl --field title --sample 2000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database URL for tasks and recommendations.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Fail tasks left IN_PROGRESS by a previous process.
    Recover,

    /// Inspect or delete task records.
    Tasks(TasksArgs),

    /// Run a recommendation job over a JSONL export.
    #[command(alias = "rec")]
    Recommend(RecommendArgs),

    /// List stored recommendations, highest counts first.
    List(ListArgs),
}

impl Commands {
    /// Commands that own job execution recover interrupted tasks first.
    fn runs_recovery(&self) -> bool {
        matches!(self, Commands::Recover | Commands::Recommend(_))
    }
}

#[derive(Parser)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub command: TasksSubcommand,
}

#[derive(Subcommand)]
pub enum TasksSubcommand {
    /// Newest tasks first.
    Recent {
        /// Zero-based page.
        #[arg(long, default_value = "0")]
        page: usize,

        #[arg(long, default_value = "20")]
        size: usize,
    },

    /// PENDING and IN_PROGRESS tasks.
    Running,

    /// Show one task.
    Show { id: Uuid },

    /// Delete one task.
    Delete { id: Uuid },
}

/// Which recommendation job to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobKind {
    Synonym,
    Dictionary,
    Queries,
}

impl JobKind {
    fn task_type(self) -> TaskType {
        match self {
            JobKind::Synonym => TaskType::SynonymRecommendation,
            JobKind::Dictionary => TaskType::DictionaryRecommendation,
            JobKind::Queries => TaskType::QueryGeneration,
        }
    }

    /// Store namespace, matching [`BatchJob::kind`].
    fn store_kind(self) -> &'static str {
        match self {
            JobKind::Synonym => "synonym",
            JobKind::Dictionary => "dictionary",
            JobKind::Queries => "query",
        }
    }
}

#[derive(Parser)]
pub struct RecommendArgs {
    /// Job to run.
    #[arg(value_enum)]
    pub kind: JobKind,

    /// JSONL file with one document per line.
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Document field to read text from.
    #[arg(short = 'f', long, default_value = "title")]
    pub field: String,

    /// Maximum number of documents to process.
    #[arg(short = 'n', long)]
    pub sample: Option<usize>,

    /// Documents per LLM call.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// LLM calls in flight per page.
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Number of LLM workers.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Model to use.
    #[arg(short = 'm', long)]
    pub model: Option<String>,
}

#[derive(Parser)]
pub struct ListArgs {
    #[arg(value_enum)]
    pub kind: JobKind,

    #[arg(long, default_value = "50")]
    pub limit: usize,
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = CuratorConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = cli.database_url {
        config = config.with_database_url(url);
    }

    let task_store = SqliteTaskStore::open(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    let manager = open_manager(&cli.command, Arc::new(task_store.clone())).await?;

    match cli.command {
        Commands::Recover => {
            println!("Recovered {} interrupted task(s)", manager.recovered_on_boot());
        }
        Commands::Tasks(args) => run_tasks_command(args.command, &manager).await?,
        Commands::Recommend(args) => {
            let store = SqliteRecommendationStore::with_pool(task_store.pool().clone()).await?;
            run_recommend_command(args, config, manager, Arc::new(store)).await?;
        }
        Commands::List(args) => {
            let store = SqliteRecommendationStore::with_pool(task_store.pool().clone()).await?;
            let rows = store.list(args.kind.store_kind(), args.limit).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

async fn open_manager(
    command: &Commands,
    store: Arc<dyn TaskStore>,
) -> Result<TaskManager, TaskError> {
    if command.runs_recovery() {
        TaskManager::boot(store).await
    } else {
        Ok(TaskManager::new(store))
    }
}

async fn run_tasks_command(command: TasksSubcommand, manager: &TaskManager) -> anyhow::Result<()> {
    match command {
        TasksSubcommand::Recent { page, size } => {
            let tasks = manager.get_recent_tasks(page, size).await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        TasksSubcommand::Running => {
            let tasks = manager.get_running_tasks().await?;
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        TasksSubcommand::Show { id } => {
            let task = manager.get_task(id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TasksSubcommand::Delete { id } => {
            manager.delete_task(id).await?;
            println!("Deleted task {}", id);
        }
    }
    Ok(())
}

async fn run_recommend_command(
    args: RecommendArgs,
    mut config: CuratorConfig,
    manager: TaskManager,
    store: Arc<dyn RecommendationStore>,
) -> anyhow::Result<()> {
    if let Some(n) = args.sample {
        config = config.with_sample_cap(n);
    }
    if let Some(n) = args.batch_size {
        config = config.with_batch_size(n);
    }
    if let Some(n) = args.parallelism {
        config = config.with_batch_parallelism(n);
    }
    if let Some(n) = args.workers {
        config = config.with_num_workers(n);
    }
    if let Some(model) = args.model {
        config.llm_model = model;
    }
    config.validate()?;

    let text = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let source = Arc::new(
        MemoryScrollSource::from_jsonl(&text)
            .with_context(|| format!("Invalid JSONL in {}", args.input.display()))?,
    );
    info!(
        documents = source.len(),
        kind = ?args.kind,
        field = %args.field,
        "Loaded documents"
    );

    let client = Arc::new(LiteLlmClient::from_config(&config)?);
    let pool = Arc::new(WorkerPool::new(config.worker_pool(), client));
    pool.start()?;

    let processor = Arc::new(BatchScrollProcessor::new(
        Arc::clone(&pool),
        config.processor(),
    )?);
    let runner = RecommendationRunner::new(Arc::clone(&pool), processor, manager, store);
    let query = ScrollQuery::new().with_required_field(args.field.clone());

    let record = match args.kind {
        JobKind::Synonym => {
            run_job(&runner, args.kind, source, query, SynonymRecommendationJob::new(args.field)).await
        }
        JobKind::Dictionary => {
            run_job(&runner, args.kind, source, query, DictionaryRecommendationJob::new(args.field)).await
        }
        JobKind::Queries => {
            run_job(&runner, args.kind, source, query, QueryGenerationJob::new(args.field)).await
        }
    };

    if let Err(e) = pool.shutdown().await {
        tracing::warn!(error = %e, "Worker pool did not shut down cleanly");
    }

    let record = record?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn run_job<J>(
    runner: &RecommendationRunner,
    kind: JobKind,
    source: Arc<MemoryScrollSource>,
    query: ScrollQuery,
    job: J,
) -> anyhow::Result<crate::tasks::AsyncTaskRecord>
where
    J: BatchJob<Item = serde_json::Value>,
{
    Ok(runner
        .run(kind.task_type(), source, query, Arc::new(job))
        .await?)
}
