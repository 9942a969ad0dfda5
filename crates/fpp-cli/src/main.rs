use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use fpp_core::NewUser;
use fpp_storage::{MemoryStore, PgStore, PredictionStore};
use fpp_sync::{build_scheduler, JobKind, LeagueConfig, Pipeline, SyncConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fpp-cli")]
#[command(about = "Football prediction platform command-line interface")]
struct Cli {
    /// Use an in-process store instead of Postgres (nothing is persisted).
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the JSON API and, unless disabled, run the scheduler.
    Serve,
    /// Apply database migrations.
    Migrate,
    /// Run pipeline jobs once and print their reports.
    Run {
        #[arg(long, value_enum, default_value_t = JobArg::All)]
        job: JobArg,
    },
    ResetSeason,
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        credential_hash: String,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobArg {
    Intake,
    Results,
    Aggregate,
    All,
}

impl JobArg {
    fn kinds(self) -> Vec<JobKind> {
        match self {
            JobArg::Intake => vec![JobKind::Intake],
            JobArg::Results => vec![JobKind::Results],
            JobArg::Aggregate => vec![JobKind::Aggregate],
            JobArg::All => JobKind::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fpp=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url, config.db_max_connections)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let pipeline = Arc::new(build_pipeline(&config, cli.memory).await?);
            let scheduler = if config.scheduler_enabled {
                let sched = build_scheduler(pipeline.clone(), &config).await?;
                sched.start().await.context("starting scheduler")?;
                Some(sched)
            } else {
                warn!("scheduler disabled; pipeline jobs only run on demand");
                None
            };
            let result = fpp_web::serve(fpp_web::AppState::new(pipeline), config.web_port).await;
            if let Some(mut sched) = scheduler {
                if let Err(err) = sched.shutdown().await {
                    warn!(error = %err, "scheduler shutdown failed");
                }
            }
            result?;
        }
        Commands::Run { job } => {
            let pipeline = build_pipeline(&config, cli.memory).await?;
            for kind in job.kinds() {
                let report = pipeline
                    .run_job(kind, Utc::now())
                    .await
                    .with_context(|| format!("running {}", kind.name()))?;
                println!("{}: {}", kind.name(), serde_json::to_string(&report)?);
            }
        }
        Commands::ResetSeason => {
            let store = open_store(&config, cli.memory).await?;
            store.reset_season(Utc::now()).await.context("resetting season")?;
            println!("season reset");
        }
        Commands::CreateUser {
            username,
            credential_hash,
            full_name,
            team,
            admin,
        } => {
            let store = open_store(&config, cli.memory).await?;
            let user = store
                .create_user(NewUser {
                    username,
                    credential_hash,
                    full_name,
                    team,
                    is_admin: admin,
                })
                .await
                .context("creating user")?;
            println!(
                "created user id={} username={} approved={}",
                user.id, user.username, user.is_approved
            );
        }
    }

    Ok(())
}

async fn open_store(config: &SyncConfig, memory: bool) -> Result<Arc<dyn PredictionStore>> {
    if memory {
        info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PgStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    Ok(Arc::new(store))
}

async fn build_pipeline(config: &SyncConfig, memory: bool) -> Result<Pipeline> {
    let store = open_store(config, memory).await?;
    let feed = config.build_feed()?;
    let league = LeagueConfig::load(&config.workspace_root).await?;
    info!(
        recorded_feed = config.feed_recordings_dir.is_some(),
        competition = %league.competition_label,
        "pipeline ready"
    );
    Ok(Pipeline::new(store, feed, league))
}
