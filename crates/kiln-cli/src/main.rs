//! Kiln CLI - autonomous skill acquisition
//!
//! Usage:
//!   kiln init [path]           Write a default `.kiln/config.toml`
//!   kiln run                   Run the agent until stopped (Ctrl-C)
//!   kiln skills list           List stored skills
//!   kiln skills clear          Delete every stored skill

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_agent::{build_model, CodeSynthesizer};
use kiln_core::KilnConfig;
use kiln_critic::Critic;
use kiln_curriculum::{Curriculum, QaService};
use kiln_env::MineflayerFactory;
use kiln_orchestrator::{
    load_history, AgentLoop, AgentSupervisor, LoopComponents, LoopConfig, ProgressEvent,
};
use kiln_skills::{SkillDescriber, SkillRepository, TermIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const KILN_DIR: &str = ".kiln";
const HISTORY_FILE: &str = "history.json";

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Autonomous skill acquisition for Minecraft agents")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Project path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the agent loop until stopped
    Run {
        /// Attempts allowed per task
        #[arg(long)]
        max_tries: Option<usize>,

        /// Keep the existing skill library and task history
        #[arg(long)]
        resume: bool,

        /// Stop after this many tasks
        #[arg(long)]
        max_tasks: Option<usize>,
    },

    /// Skill library management
    Skills {
        #[command(subcommand)]
        action: SkillCommands,
    },
}

#[derive(Subcommand)]
enum SkillCommands {
    /// List stored skills
    List,
    /// Delete every stored skill
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Run {
            max_tries,
            resume,
            max_tasks,
        } => cmd_run(max_tries, resume, max_tasks).await,
        Commands::Skills { action } => cmd_skills(action).await,
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    info!("Initializing Kiln in {:?}", path);

    let config_path = KilnConfig::write_default(path).context("Failed to write default config")?;

    println!("Initialized Kiln in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Start the Mineflayer bridge and a game server");
    println!("  2. Set the API key named in [model].api_key_env");
    println!("  3. kiln run");
    Ok(())
}

fn load_config() -> Result<KilnConfig> {
    let root = std::env::current_dir().context("Failed to read current directory")?;
    KilnConfig::load_or_default(&root).context("Failed to load .kiln/config.toml")
}

async fn cmd_run(max_tries: Option<usize>, resume: bool, max_tasks: Option<usize>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(max_tries) = max_tries {
        config.loop_settings.max_tries = max_tries;
    }
    if resume {
        config.loop_settings.resume = true;
    }
    if max_tasks.is_some() {
        config.loop_settings.max_tasks = max_tasks;
    }
    config.validate().context("Invalid run options")?;

    let kiln_dir = PathBuf::from(KILN_DIR);
    let history_path = kiln_dir.join(HISTORY_FILE);
    let resume = config.loop_settings.resume;

    let model = build_model(&config.model).context("Failed to build language model")?;
    let skills = Arc::new(
        SkillRepository::open(&config.skills, resume)
            .await
            .context("Failed to open skill library")?,
    );

    let mut curriculum = Curriculum::new(model.clone());
    if config.qa.enabled {
        let cache = TermIndex::open(&config.qa.cache_path)
            .await
            .context("Failed to open QA cache")?;
        curriculum = curriculum.with_qa(QaService::new(model.clone(), Arc::new(cache), config.qa.min_score));
    }
    if resume {
        let history = load_history(&history_path)
            .await
            .context("Failed to load task history")?;
        info!(
            "Resuming with {} completed and {} failed tasks",
            history.completed().len(),
            history.failed().len()
        );
        curriculum = curriculum.with_history(history);
    }

    let components = LoopComponents {
        curriculum,
        synthesizer: CodeSynthesizer::new(model.clone()),
        critic: Critic::new(model.clone()),
        describer: SkillDescriber::new(model),
        skills,
    };
    let agent_loop = AgentLoop::new(components, LoopConfig::from_config(&config))
        .with_activity_logging(kiln_dir)
        .with_history_path(history_path);

    let factory = Arc::new(MineflayerFactory::new(config.environment.clone()));
    let mut supervisor = AgentSupervisor::new(agent_loop, factory);

    let mut events = Box::pin(supervisor.progress().stream());
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            report(&event);
        }
    });

    supervisor.start().await.context("Failed to start agent")?;

    let outcome = tokio::select! {
        result = supervisor.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match outcome {
        Some(result) => result.map(Some),
        None => {
            println!("\nStopping agent...");
            supervisor.stop().await
        }
    };
    reporter.abort();

    match outcome {
        Ok(exit) => {
            println!("Agent stopped: {:?}", exit);
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Agent halted")),
    }
}

fn report(event: &ProgressEvent) {
    match event {
        ProgressEvent::TaskProposed { task, reasoning } => {
            info!("Next task: {} ({})", task, reasoning);
        }
        ProgressEvent::Attempt(report) => {
            let entry = report.entry.as_deref().unwrap_or("<no code>");
            if report.success {
                info!("[{}/{}] {} succeeded", report.attempt, report.max_tries, entry);
            } else {
                info!(
                    "[{}/{}] {} failed: {}",
                    report.attempt, report.max_tries, entry, report.critique
                );
            }
        }
        ProgressEvent::TaskFinished {
            task,
            outcome,
            attempts,
        } => info!("Task {} {:?} after {} attempt(s)", task, outcome, attempts),
        ProgressEvent::Halted { stage, message } => {
            error!("Agent halted in {} stage: {}", stage, message);
        }
    }
}

async fn cmd_skills(action: SkillCommands) -> Result<()> {
    let config = load_config()?;
    let repository = SkillRepository::open(&config.skills, true)
        .await
        .context("Failed to open skill library")?;

    match action {
        SkillCommands::List => {
            let skills = repository.list().await?;
            if skills.is_empty() {
                println!("No skills stored in {}", config.skills.index_path.display());
                return Ok(());
            }
            println!("{} skill(s):", skills.len());
            for skill in skills {
                println!("  {:<30} {}", skill.name, skill.description);
            }
        }
        SkillCommands::Clear => {
            let count = repository.count().await?;
            repository.clear().await?;
            if count == 0 {
                warn!("Skill library was already empty");
            }
            println!("Removed {} skill(s)", count);
        }
    }
    Ok(())
}
