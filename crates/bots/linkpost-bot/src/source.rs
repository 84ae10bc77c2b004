use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};
use url::Url;

const LOG_TARGET: &str = "linkpost::source";

/// Articles requested per fetch
pub const PAGE_SIZE: u32 = 10;
pub const FIRST_PAGE: u32 = 1;

#[derive(Debug, Snafu)]
pub enum SourceError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("HTTP request failed: {source}"))]
    Http { source: reqwest::Error },
    #[snafu(display("Article source responded with {status}"))]
    Status { status: StatusCode },
    #[snafu(display("Failed to decode article list: {source}"))]
    Decode { source: serde_json::Error },
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// An article as listed by the source, valid for the current run only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateArticle {
    /// Canonical link, compared verbatim against the ledger
    #[serde(default, deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    /// ISO-8601 publication time, unparsed
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticlesPage {
    #[serde(default, deserialize_with = "null_as_default")]
    articles: Vec<CandidateArticle>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a response body of the article source.
pub fn parse_articles_page(json: &[u8]) -> serde_json::Result<Vec<CandidateArticle>> {
    Ok(serde_json::from_slice::<ArticlesPage>(json)?.articles)
}

#[async_trait::async_trait]
pub trait ArticleSource {
    /// Fetch one page of the most recent articles.
    ///
    /// No retries: a failed fetch fails the run.
    async fn fetch_articles(&self) -> SourceResult<Vec<CandidateArticle>>;
}

pub struct HttpArticleSource {
    client: Client,
    endpoint: Url,
}

impl HttpArticleSource {
    pub fn new(endpoint: Url) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("linkpost-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(ClientSnafu)?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ArticleSource for HttpArticleSource {
    async fn fetch_articles(&self) -> SourceResult<Vec<CandidateArticle>> {
        info!(target: LOG_TARGET, endpoint = %self.endpoint, "Fetching articles");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("size", PAGE_SIZE), ("page", FIRST_PAGE)])
            .send()
            .await
            .context(HttpSnafu)?;

        let status = response.status();
        if !status.is_success() {
            return StatusSnafu { status }.fail();
        }

        let body = response.bytes().await.context(HttpSnafu)?;
        let articles = parse_articles_page(&body).context(DecodeSnafu)?;

        debug!(target: LOG_TARGET, bytes = body.len(), "Decoded article list");
        info!(target: LOG_TARGET, count = articles.len(), "Fetched articles");
        Ok(articles)
    }
}
