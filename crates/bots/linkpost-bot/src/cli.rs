use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use linkpost_bot::config::{ACCESS_TOKEN_ENV, ARTICLES_API_URL_ENV, RawConfig};
use linkpost_bot::eligibility::parse_publish_date;
use time::OffsetDateTime;

/// Older name of the access token variable, still honored
pub const LEGACY_ACCESS_TOKEN_ENV: &str = "ACCESS_TOKEN";
pub const DRY_RUN_ENV: &str = "LINKPOST_DRY_RUN";

/// LinkPost Bot - shares the newest unpublished article on LinkedIn
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunOpts,
}

/// Settings shared by the run and the dev commands, accepted before or after
/// the subcommand
#[derive(Debug, Args)]
pub struct RunOpts {
    /// LinkedIn access token
    #[arg(long, global = true, env = ACCESS_TOKEN_ENV, hide_env_values = true)]
    pub access_token: Option<String>,

    /// Endpoint listing the most recent articles
    #[arg(long, global = true, env = ARTICLES_API_URL_ENV)]
    pub articles_api_url: Option<String>,

    /// Directory holding the ledger and its backups
    #[arg(long, global = true, env = "LINKPOST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Articles published before this time are never posted
    #[arg(long, global = true, env = "LINKPOST_MIN_PUBLISH_DATE", value_parser = parse_cutoff)]
    pub min_publish_date: Option<OffsetDateTime>,

    /// API key of the language model
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Root of an OpenAI-compatible API
    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    pub llm_base_url: Option<String>,

    #[arg(long, global = true, env = "LINKPOST_LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Sampling temperature; the model's default when unset
    #[arg(long, global = true, env = "LINKPOST_LLM_TEMPERATURE")]
    pub llm_temperature: Option<f32>,

    /// Generate the post, but don't publish or record it
    #[arg(long, global = true)]
    pub dry_run: bool,
}

impl RunOpts {
    pub fn into_raw_config(self) -> RawConfig {
        RawConfig {
            access_token: self
                .access_token
                .or_else(|| linkpost_util::env_var_nonempty(LEGACY_ACCESS_TOKEN_ENV)),
            articles_api_url: self.articles_api_url,
            data_dir: self.data_dir,
            min_publish_date: self.min_publish_date,
            llm_api_key: self.llm_api_key,
            llm_base_url: self.llm_base_url,
            llm_model: self.llm_model,
            llm_temperature: self.llm_temperature,
            dry_run: self.dry_run || linkpost_util::is_env_var_set(DRY_RUN_ENV),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Obtain a LinkedIn access token through the browser
    Auth {
        #[arg(long, env = "LINKEDIN_CLIENT_ID")]
        client_id: Option<String>,

        #[arg(long, env = "LINKEDIN_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
    },
    /// Development commands
    Dev {
        #[command(subcommand)]
        dev_command: DevCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum DevCommand {
    /// Fetch articles and show what a run would do with each of them
    Fetch,
    /// Print all ledger records as JSON
    Ledger,
}

fn parse_cutoff(s: &str) -> Result<OffsetDateTime, String> {
    parse_publish_date(s).ok_or_else(|| format!("invalid date: {s}"))
}
