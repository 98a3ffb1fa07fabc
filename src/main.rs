//! ShareBib crawl main entry point
//!
//! Command-line interface for running the crawl scheduler and managing
//! crawl tasks.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sharebib_crawl::config::{load_config, Config};
use sharebib_crawl::crawl::{CrawlExecutor, CrawlScheduler, NewCrawlTask, TaskService};
use sharebib_crawl::sources::{build_http_client, SourceRegistry};
use sharebib_crawl::state::{DuplicateStrategy, ScheduleType};
use sharebib_crawl::storage::{
    lock_store, open_storage, share, CollectionStore, CrawlTarget, CrawlTask, NewCollection,
    SharedStore, UserSettingsStore,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ShareBib crawl: scheduled paper imports into collections
///
/// Runs crawl tasks against external paper sources (arXiv RSS, Semantic
/// Scholar) on a schedule and imports the results into collections,
/// deduplicating against papers already in the library.
#[derive(Parser, Debug)]
#[command(name = "sharebib-crawl")]
#[command(version)]
#[command(about = "Scheduled paper crawls for ShareBib collections", long_about = None)]
struct Cli {
    /// Path to TOML configuration file; defaults are used when omitted
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve,

    /// List available sources and their configuration fields
    Sources,

    /// Create a collection that tasks can append to
    AddCollection {
        #[arg(long)]
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        owner: String,
    },

    /// Create a crawl task
    AddTask {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        /// Source type, e.g. arxiv_rss
        #[arg(long)]
        source: String,
        /// Source configuration as a JSON object
        #[arg(long, default_value = "{}")]
        source_config: String,
        #[arg(long, default_value = "daily", value_parser = parse_schedule)]
        schedule: ScheduleType,
        /// Append to this existing collection
        #[arg(long, conflicts_with = "new_collection_prefix")]
        target_collection: Option<String>,
        /// Create a new dated collection with this prefix on every run
        #[arg(long)]
        new_collection_prefix: Option<String>,
        #[arg(long, default_value = "skip", value_parser = parse_duplicate_strategy)]
        duplicate_strategy: DuplicateStrategy,
    },

    /// List crawl tasks
    Tasks {
        /// Only tasks of this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Show one task as JSON
    Show { task_id: String },

    /// Run a task immediately
    Run { task_id: String },

    /// Run every due task once and exit
    RunDue,

    /// Show the run history of a task
    Runs { task_id: String },

    Enable { task_id: String },

    Disable { task_id: String },

    Delete { task_id: String },

    /// Store a per-user setting, such as semantic_scholar_api_key
    SetSetting {
        #[arg(long)]
        user: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },
}

fn parse_schedule(s: &str) -> Result<ScheduleType, String> {
    ScheduleType::from_db_string(s)
        .ok_or_else(|| format!("unknown schedule '{}' (once, daily, weekly, monthly)", s))
}

fn parse_duplicate_strategy(s: &str) -> Result<DuplicateStrategy, String> {
    match s {
        "skip" => Ok(DuplicateStrategy::Skip),
        "update" => Ok(DuplicateStrategy::Update),
        "keep_existing" => Ok(DuplicateStrategy::KeepExisting),
        "use_new" => Ok(DuplicateStrategy::UseNew),
        _ => Err(format!(
            "unknown duplicate strategy '{}' (skip, update, keep_existing, use_new)",
            s
        )),
    }
}

/// Everything the commands operate on
struct App {
    store: SharedStore,
    scheduler: CrawlScheduler,
    tasks: TaskService,
}

impl App {
    fn build(config: &Config) -> Result<Self> {
        let storage = open_storage(&config.storage.database_path).with_context(|| {
            format!(
                "Failed to open database {}",
                config.storage.database_path.display()
            )
        })?;
        let store = share(storage);

        let client = build_http_client(&config.user_agent, &config.http)?;
        let registry = SourceRegistry::with_defaults(config, client);

        let executor = CrawlExecutor::new(store.clone(), registry.clone());
        let scheduler =
            CrawlScheduler::new(store.clone(), executor, config.scheduler.poll_interval());
        let tasks = TaskService::new(store.clone(), registry, scheduler.running_tasks());

        Ok(Self {
            store,
            scheduler,
            tasks,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let loaded = load_config(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", loaded.hash);
            loaded.config
        }
        None => Config::default(),
    };

    let mut app = App::build(&config)?;

    match cli.command {
        Commands::Serve => handle_serve(&mut app).await?,
        Commands::Sources => {
            println!("{}", serde_json::to_string_pretty(&app.tasks.list_sources())?);
        }
        Commands::AddCollection { id, title, owner } => {
            lock_store(&app.store)?.create_collection(&NewCollection {
                id: id.clone(),
                title,
                description: None,
                created_by: owner,
                task_type: "manual".to_string(),
                task_source: None,
                task_source_display: None,
            })?;
            println!("✓ Created collection {}", id);
        }
        Commands::AddTask {
            user,
            name,
            source,
            source_config,
            schedule,
            target_collection,
            new_collection_prefix,
            duplicate_strategy,
        } => {
            let target = match (target_collection, new_collection_prefix) {
                (Some(collection_id), None) => CrawlTarget::Append { collection_id },
                (None, Some(prefix)) => CrawlTarget::CreateNew { prefix },
                _ => bail!("Specify exactly one of --target-collection or --new-collection-prefix"),
            };
            let source_config = serde_json::from_str(&source_config)
                .context("--source-config must be a JSON object")?;

            let task = app.tasks.create_task(
                NewCrawlTask {
                    user_id: user,
                    name,
                    source_type: source,
                    source_config,
                    schedule_type: schedule,
                    target,
                    duplicate_strategy,
                },
                Utc::now(),
            )?;
            println!("✓ Created task {}", task.id);
            print_task(&task);
        }
        Commands::Tasks { user } => {
            let tasks = app.tasks.list_tasks(user.as_deref())?;
            if tasks.is_empty() {
                println!("No crawl tasks");
            }
            for task in &tasks {
                print_task(task);
            }
        }
        Commands::Show { task_id } => {
            let task = app.tasks.get_task(&task_id)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Commands::Run { task_id } => {
            if !app.scheduler.run_task_now(&task_id).await? {
                bail!("Task {} is already running", task_id);
            }
            let task = app.tasks.get_task(&task_id)?;
            print_task(&task);
            if let Some(result) = &task.last_run_result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
        Commands::RunDue => {
            let executed = app.scheduler.run_due_tasks().await?;
            println!("✓ Executed {} due tasks", executed);
        }
        Commands::Runs { task_id } => {
            for run in app.tasks.list_runs(&task_id)? {
                println!(
                    "{}  {}  {:<8} {}",
                    run.started_at.to_rfc3339(),
                    run.id,
                    run.status,
                    run.collection_id.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Enable { task_id } => print_task(&app.tasks.enable_task(&task_id, Utc::now())?),
        Commands::Disable { task_id } => print_task(&app.tasks.disable_task(&task_id)?),
        Commands::Delete { task_id } => {
            app.tasks.delete_task(&task_id)?;
            println!("✓ Deleted task {}", task_id);
        }
        Commands::SetSetting { user, key, value } => {
            lock_store(&app.store)?.put_setting(&user, &key, &value)?;
            println!("✓ Stored {} for {}", key, user);
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sharebib_crawl=info,warn"),
            1 => EnvFilter::new("sharebib_crawl=debug,info"),
            2 => EnvFilter::new("sharebib_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs the scheduler until Ctrl+C
async fn handle_serve(app: &mut App) -> Result<()> {
    tracing::info!(
        "Serving {} crawl tasks",
        app.tasks.list_tasks(None)?.len()
    );
    app.scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down");

    app.scheduler.stop().await;
    Ok(())
}

fn print_task(task: &CrawlTask) {
    let target = match &task.target {
        CrawlTarget::Append { collection_id } => format!("-> {}", collection_id),
        CrawlTarget::CreateNew { prefix } => format!("-> new '{}'", prefix),
    };
    println!(
        "{}  {:<24} {:<16} {:<8} {:<8} {} next: {} last: {}",
        task.id,
        task.name,
        task.source_type,
        task.schedule_type,
        if task.is_enabled { "enabled" } else { "disabled" },
        target,
        task.next_run_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        task.last_run_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
}
