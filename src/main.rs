use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use feedwatch::config::Config;
use feedwatch::db::models::{FeedKind, NewCampaign, MIN_INTERVAL_SECS};
use feedwatch::db::Database;
use feedwatch::feed::rate_limiter::RateLimiter;
use feedwatch::feed::reddit::RedditClient;
use feedwatch::feed::FeedClient;
use feedwatch::ingest::Ingestor;
use feedwatch::matching::KeywordFilter;
use feedwatch::output::terminal;
use feedwatch::scheduler::{execute_job, Scheduler};

/// Feedwatch: keyword monitoring over Reddit's public feed.
///
/// Keeps a local cache of new posts and comments, and checks each keyword
/// campaign against that cache on its own schedule.
#[derive(Parser)]
#[command(name = "feedwatch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run ingestion and the campaign scheduler until Ctrl-C
    Run {
        /// Don't ingest; only match against what is already cached
        #[arg(long)]
        no_ingest: bool,

        /// Don't run campaign jobs; only fill the cache
        #[arg(long)]
        no_match: bool,
    },

    /// Fetch a few pages in the foreground and print each cursor step
    Ingest {
        /// Which stream to ingest (posts or comments)
        #[arg(long, default_value = "posts")]
        stream: String,

        /// Number of fetch steps (default: 1)
        #[arg(long, default_value = "1")]
        pages: usize,
    },

    /// Manage keyword campaigns
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },

    /// Run matching jobs now for every active campaign (or just one)
    Match {
        #[arg(long)]
        campaign: Option<i64>,
    },

    /// Show recent matches for a campaign
    Matches {
        campaign_id: i64,

        /// Max matches to show (default: 20)
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Point a stream's cursor back at the feed head
    ResetCursor {
        /// posts or comments
        stream: String,
    },

    /// Show system status (cache size, cursors, campaigns)
    Status,
}

#[derive(Subcommand)]
enum CampaignAction {
    /// Create a campaign
    Add {
        name: String,

        /// Keyword to watch for (repeatable)
        #[arg(short, long = "keyword", required = true)]
        keywords: Vec<String>,

        /// Seconds between checks (minimum 30)
        #[arg(long, default_value = "300")]
        interval: u32,
    },

    /// List all campaigns
    List,

    /// Stop checking a campaign
    Pause { id: i64 },

    /// Start checking a paused campaign again
    Resume { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedwatch=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing feedwatch database...");
            let conn = feedwatch::db::initialize(&config.db_path)?;
            let table_count = feedwatch::db::schema::table_count(&conn)?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nNext: add a campaign, e.g.");
            println!("  feedwatch campaign add rustlang -k rust -k tokio --interval 60");
            println!("\nThen run: feedwatch run");
        }

        Commands::Run {
            no_ingest,
            no_match,
        } => {
            if no_ingest && no_match {
                anyhow::bail!("--no-ingest and --no-match together leave nothing to run");
            }
            let db = feedwatch::db::open_shared(&config.db_path)?;
            run_service(&config, db, !no_ingest, !no_match).await?;
        }

        Commands::Ingest { stream, pages } => {
            config.require_feed()?;
            let kind = parse_stream(&stream)?;
            let db = feedwatch::db::open_shared(&config.db_path)?;
            let mut ingestor =
                Ingestor::resume(kind, reddit_client(&config)?, db, config.backoff).await?;

            println!(
                "{}",
                format!("Ingesting {} page(s) from {}", pages, kind).bold()
            );
            for step in 1..=pages {
                let transition = ingestor.advance().await;
                terminal::display_transition(kind, step, &transition, ingestor.cursor());
                if step < pages {
                    tokio::time::sleep(transition.delay).await;
                }
            }
        }

        Commands::Campaign { action } => {
            let db = feedwatch::db::open_shared(&config.db_path)?;
            campaign_command(db, action).await?;
        }

        Commands::Match { campaign } => {
            let db = feedwatch::db::open_shared(&config.db_path)?;
            match_now(&config, db, campaign).await?;
        }

        Commands::Matches { campaign_id, limit } => {
            let db = feedwatch::db::open_shared(&config.db_path)?;
            let campaign = db
                .get_campaign(campaign_id)
                .await?
                .with_context(|| format!("No campaign with id {campaign_id}"))?;
            let matches = db.get_matches(campaign_id, limit).await?;
            terminal::display_matches(&campaign, &matches);
        }

        Commands::ResetCursor { stream } => {
            let kind = parse_stream(&stream)?;
            let db = feedwatch::db::open_shared(&config.db_path)?;
            let mut ingestor =
                Ingestor::resume(kind, reddit_client(&config)?, db, config.backoff).await?;
            let old = ingestor.cursor().position.clone();
            ingestor.reset().await?;
            println!(
                "{} cursor reset to feed head (was {})",
                kind,
                old.as_deref().unwrap_or("<head>")
            );
            println!(
                "{}",
                "Items between the old position and the head will not be ingested.".dimmed()
            );
        }

        Commands::Status => {
            if !Path::new(&config.db_path).exists() {
                println!("Database: not initialized");
                println!("\nRun `feedwatch init` to set up the database.");
                return Ok(());
            }
            let db = feedwatch::db::open_shared(&config.db_path)?;
            feedwatch::status::show(&db, &config.db_path).await?;
        }
    }

    Ok(())
}

/// Run the ingestion loops and the scheduler until Ctrl-C.
async fn run_service(
    config: &Config,
    db: Arc<dyn Database>,
    ingest: bool,
    matching: bool,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    if ingest {
        config.require_feed()?;
        // One client (and one rate limiter) shared by every stream
        let client = reddit_client(config)?;
        for &kind in &config.streams {
            let ingestor =
                Ingestor::resume(kind, client.clone(), db.clone(), config.backoff).await?;
            tasks.spawn(ingestor.run(shutdown_rx.clone()));
        }
    }

    if matching {
        let scheduler = Scheduler::new(db.clone(), Arc::new(KeywordFilter), config.scheduler);
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            scheduler.run(rx).await;
            Ok(())
        });
    }

    println!("{}", "feedwatch running. Press Ctrl-C to stop.".bold());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Task stopped with an error"),
            Err(e) => error!(error = %e, "Task panicked"),
        }
    }
    println!("Stopped.");
    Ok(())
}

async fn campaign_command(db: Arc<dyn Database>, action: CampaignAction) -> Result<()> {
    match action {
        CampaignAction::Add {
            name,
            keywords,
            interval,
        } => {
            let campaign = NewCampaign::new(&name, &keywords, interval);
            if campaign.name.is_empty() {
                anyhow::bail!("Campaign name can't be empty");
            }
            if campaign.keywords.is_empty() {
                anyhow::bail!("Campaign needs at least one non-empty keyword");
            }
            if interval < MIN_INTERVAL_SECS {
                println!(
                    "{}",
                    format!("Interval raised to the {MIN_INTERVAL_SECS}s minimum").yellow()
                );
            }
            let id = db.insert_campaign(&campaign).await?;
            println!(
                "Created campaign #{id} \"{}\" watching: {}",
                campaign.name,
                campaign.keywords.join(", ")
            );
        }
        CampaignAction::List => {
            let campaigns = db.list_campaigns(false).await?;
            terminal::display_campaigns(&campaigns, Utc::now());
        }
        CampaignAction::Pause { id } => {
            if !db.set_campaign_active(id, false).await? {
                anyhow::bail!("No campaign with id {id}");
            }
            println!("Campaign #{id} paused");
        }
        CampaignAction::Resume { id } => {
            if !db.set_campaign_active(id, true).await? {
                anyhow::bail!("No campaign with id {id}");
            }
            println!("Campaign #{id} resumed");
        }
    }
    Ok(())
}

/// Run matching jobs immediately, bypassing the schedule.
async fn match_now(config: &Config, db: Arc<dyn Database>, only: Option<i64>) -> Result<()> {
    let campaigns = match only {
        Some(id) => {
            let campaign = db
                .get_campaign(id)
                .await?
                .with_context(|| format!("No campaign with id {id}"))?;
            vec![campaign]
        }
        None => db.list_campaigns(true).await?,
    };

    if campaigns.is_empty() {
        println!("No active campaigns to match.");
        return Ok(());
    }

    let filter = KeywordFilter;
    let job_settings = config.scheduler.job;

    let pb = ProgressBar::new(campaigns.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar().template("  Matching [{bar:30}] {pos}/{len} ({eta})")?,
    );

    let results: Vec<_> = futures::stream::iter(campaigns.iter())
        .map(|campaign| {
            let db = db.clone();
            let filter = &filter;
            let pb = &pb;
            async move {
                let result = execute_job(db, filter, campaign, &job_settings).await;
                pb.inc(1);
                (campaign, result)
            }
        })
        .buffer_unordered(config.scheduler.max_concurrent_jobs)
        .collect()
        .await;

    pb.finish_and_clear();

    let mut failed = 0;
    for (campaign, result) in &results {
        match result {
            Ok(report) => terminal::display_job_report(campaign, report),
            Err(e) => {
                failed += 1;
                println!("  {:<20} {} {}", campaign.name, "failed:".red(), e);
            }
        }
    }
    if failed > 0 {
        warn!(failed, "Some matching jobs failed");
    }
    Ok(())
}

fn parse_stream(name: &str) -> Result<FeedKind> {
    FeedKind::parse(name)
        .with_context(|| format!("Unknown stream {name:?}. Use posts or comments."))
}

fn reddit_client(config: &Config) -> Result<Arc<dyn FeedClient>> {
    let limiter = RateLimiter::per_minute(config.requests_per_minute);
    let client = RedditClient::new(
        &config.reddit_api_url,
        &config.reddit_user_agent,
        config.page_limit,
        limiter,
    )?;
    Ok(Arc::new(client))
}
