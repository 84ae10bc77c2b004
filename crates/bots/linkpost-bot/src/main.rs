mod cli;

use std::io;
use std::path::PathBuf;

use clap::Parser;
use linkpost_bot::PROJECT_NAME;
use linkpost_bot::auth::{self, AuthError, ClientCredentials};
use linkpost_bot::config::{ConfigError, DEFAULT_DATA_DIR, articles_api_url};
use linkpost_bot::eligibility::{DEFAULT_MIN_PUBLISH_DATE, judge};
use linkpost_bot::generator::{GenerationError, OpenAiPostGenerator};
use linkpost_bot::ledger::{Ledger, LedgerError};
use linkpost_bot::publisher::{LinkedInPublisher, PublishError};
use linkpost_bot::run::{RunError, RunOutcome, run_once};
use linkpost_bot::source::{ArticleSource as _, HttpArticleSource, SourceError};
use snafu::{ResultExt as _, Snafu};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, DevCommand, Opts, RunOpts};

const LOG_TARGET: &str = "linkpost::main";

#[derive(Debug, Snafu)]
pub enum BotError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },
    #[snafu(display("Article source error: {source}"))]
    Source { source: SourceError },
    #[snafu(display("Generator error: {source}"))]
    Generation { source: GenerationError },
    #[snafu(display("Publisher error: {source}"))]
    Publish { source: PublishError },
    #[snafu(display("Ledger error: {source}"))]
    Ledger { source: LedgerError },
    #[snafu(display("Run failed: {source}"))]
    Run { source: RunError },
    #[snafu(display("Authorization failed: {source}"))]
    Auth { source: AuthError },
    #[snafu(display("Failed to serialize ledger: {source}"))]
    Json { source: serde_json::Error },
    #[snafu(display("Logging initialization failed"))]
    Logging,
}

pub type BotResult<T> = std::result::Result<T, BotError>;

#[snafu::report]
#[tokio::main]
async fn main() -> BotResult<()> {
    // A missing .env is the normal case outside of local development
    let _ = dotenvy::dotenv();

    init_logging()?;

    let opts = Opts::parse();

    match opts.command {
        Some(Command::Auth {
            client_id,
            client_secret,
        }) => handle_auth(client_id, client_secret).await,
        Some(Command::Dev { dev_command }) => handle_dev_command(dev_command, opts.run).await,
        None => run_bot(opts.run).await,
    }
}

async fn run_bot(opts: RunOpts) -> BotResult<()> {
    let config = opts.into_raw_config().resolve().context(ConfigSnafu)?;
    info!(
        target: LOG_TARGET,
        articles_api_url = %config.articles_api_url,
        data_dir = %config.data_dir.display(),
        min_publish_date = %config.min_publish_date,
        model = %config.llm.model,
        dry_run = config.dry_run,
        "Starting {PROJECT_NAME}"
    );

    let ledger = Ledger::new(&config.data_dir);
    let source = HttpArticleSource::new(config.articles_api_url.clone()).context(SourceSnafu)?;
    let generator = OpenAiPostGenerator::new(config.llm.clone()).context(GenerationSnafu)?;
    let publisher = LinkedInPublisher::new().context(PublishSnafu)?;

    match run_once(&config, &ledger, &source, &generator, &publisher)
        .await
        .context(RunSnafu)?
    {
        RunOutcome::NoWork => info!(target: LOG_TARGET, "Nothing to do"),
        RunOutcome::DryRun { url, text } => {
            println!("Would post for {url}:");
            println!();
            println!("{text}");
        }
        RunOutcome::Published { record } => info!(
            target: LOG_TARGET,
            id = record.id,
            url = %record.url,
            post_id = %record.external_post_id,
            "Run complete"
        ),
    }

    Ok(())
}

async fn handle_auth(client_id: Option<String>, client_secret: Option<String>) -> BotResult<()> {
    let credentials = ClientCredentials::new(client_id, client_secret).context(AuthSnafu)?;
    let token = auth::obtain_token(credentials).await.context(AuthSnafu)?;

    println!();
    println!("{}", "=".repeat(60));
    println!("SUCCESS! Your access token:");
    println!("{}", "=".repeat(60));
    println!("{}", token.access_token);
    println!("{}", "=".repeat(60));
    println!();
    println!("Token expires in {} days", token.expires_in_days());
    println!("Store it as LINKEDIN_ACCESS_TOKEN for regular runs.");

    Ok(())
}

async fn handle_dev_command(dev_command: DevCommand, opts: RunOpts) -> BotResult<()> {
    let data_dir = opts
        .data_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let ledger = Ledger::new(&data_dir);
    // Dev commands never create the ledger; missing means nothing was published
    let ledger_exists = ledger.exists().await.context(LedgerSnafu)?;

    match dev_command {
        DevCommand::Fetch => {
            let articles_api_url = articles_api_url(opts.articles_api_url).context(ConfigSnafu)?;
            let cutoff = opts.min_publish_date.unwrap_or(DEFAULT_MIN_PUBLISH_DATE);

            let known_urls = if ledger_exists {
                ledger.known_urls().await.context(LedgerSnafu)?
            } else {
                Default::default()
            };

            let source = HttpArticleSource::new(articles_api_url).context(SourceSnafu)?;
            let articles = source.fetch_articles().await.context(SourceSnafu)?;

            println!(
                "Fetched {} articles from {} (cutoff {cutoff}):",
                articles.len(),
                source.endpoint()
            );
            println!();
            for (i, article) in articles.iter().enumerate() {
                println!("Article {}: ", i + 1);
                println!("  Title: {}", article.title);
                println!("  Link: {}", article.link);
                println!(
                    "  Published at: {}",
                    article.published_at.as_deref().unwrap_or("None")
                );
                println!("  Verdict: {:?}", judge(article, &known_urls, cutoff));
                println!();
            }
            Ok(())
        }
        DevCommand::Ledger => {
            let records = if ledger_exists {
                ledger.records().await.context(LedgerSnafu)?
            } else {
                Vec::new()
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context(JsonSnafu)?
            );
            Ok(())
        }
    }
}

pub fn init_logging() -> BotResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| BotError::Logging)?;

    Ok(())
}
