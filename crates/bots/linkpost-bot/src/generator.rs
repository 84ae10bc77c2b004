//! Promotional post text from a language model.
//!
//! The model is treated as an opaque text source. What this module does own
//! is rejecting output that must never be posted: a failed call or a
//! (nearly) empty answer is an error, never a fallback text.

use std::fmt::Write as _;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::{debug, info};
use url::Url;

const LOG_TARGET: &str = "linkpost::generator";

/// Shortest acceptable post, counted in characters after trimming
pub const MIN_POST_CHARS: usize = 20;
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-5-mini";

#[derive(Debug, Snafu)]
pub enum GenerationError {
    #[snafu(display("OPENAI_API_KEY is not set"))]
    MissingApiKey,
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Invalid completions endpoint: {source}"))]
    Endpoint { source: url::ParseError },
    #[snafu(display("Completion request failed: {source}"))]
    Request { source: reqwest::Error },
    #[snafu(display("Completion endpoint responded with {status}: {body}"))]
    Status { status: StatusCode, body: String },
    #[snafu(display("Failed to decode completion: {source}"))]
    Decode { source: reqwest::Error },
    #[snafu(display("Completion contained no text"))]
    EmptyResponse,
    #[snafu(display("Generated post is too short ({len} characters)"))]
    TooShort { len: usize },
}

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// OpenAI-compatible API root, `/chat/completions` is appended
    pub base_url: Url,
    pub model: String,
    /// Left to the model's default when unset
    pub temperature: Option<f32>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Article content the post is written about
#[derive(Debug, Clone, Copy)]
pub struct PostRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub body: &'a str,
    /// Recent posts, so the model can avoid repeating itself
    pub previous_posts: &'a [String],
}

#[async_trait::async_trait]
pub trait PostGenerator {
    /// Generate post text; never returns text shorter than
    /// [`MIN_POST_CHARS`].
    async fn generate(&self, request: &PostRequest<'_>) -> GenerationResult<String>;
}

/// Trim `text` and reject it if too little is left.
pub fn validate_post_text(text: &str) -> GenerationResult<String> {
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len < MIN_POST_CHARS {
        return TooShortSnafu { len }.fail();
    }
    Ok(trimmed.to_owned())
}

pub fn build_prompt(request: &PostRequest<'_>) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are writing a LinkedIn post as the author of a technical article.\n\
         Write in first person, as if you wrote this article and want to share it with your network.\n\n",
    );
    let _ = writeln!(prompt, "Article Title: {}", request.title);
    let _ = writeln!(prompt, "Article Description: {}", request.description);
    let _ = writeln!(prompt, "Article Content: {}", request.body);
    prompt.push('\n');

    if !request.previous_posts.is_empty() {
        prompt.push_str(
            "Here are my most recent LinkedIn posts. \
             Avoid repeating similar openings, structures, or phrases:\n",
        );
        prompt.push_str(&request.previous_posts.join("\n---\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "Style guide (based on how I write):\n\
         - First person, personal tone\n\
         - Conversational and authentic, like talking to a friend\n\
         - Show genuine enthusiasm about the topic\n\
         - Short paragraphs, easy to read\n\
         - 1-2 emojis only if they feel natural; most posts need none\n\
         - NO hashtags\n\
         - Keep it brief (2-4 sentences max)\n\
         - Do NOT include promotional details like \"tech preview\", \"trial\", \"free tier\", \"available now\"\n\
         - Focus on the technical content and value, not marketing\n\n\
         Now write a post promoting this article in that personal, enthusiastic style.\n\
         Return ONLY the post text, nothing else.\n",
    );

    prompt
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

/// [`PostGenerator`] backed by an OpenAI-compatible chat completions API.
pub struct OpenAiPostGenerator {
    client: Client,
    config: LlmConfig,
}

impl OpenAiPostGenerator {
    pub fn new(config: LlmConfig) -> GenerationResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("linkpost-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> GenerationResult<Url> {
        let mut base = self.config.base_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join("chat/completions").context(EndpointSnafu)
    }
}

#[async_trait::async_trait]
impl PostGenerator for OpenAiPostGenerator {
    async fn generate(&self, request: &PostRequest<'_>) -> GenerationResult<String> {
        let api_key = self.config.api_key.as_deref().context(MissingApiKeySnafu)?;
        let prompt = build_prompt(request);
        let url = self.completions_url()?;

        info!(
            target: LOG_TARGET,
            model = %self.config.model,
            title = %request.title,
            previous_posts = request.previous_posts.len(),
            "Generating post text"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.config.model,
                messages: [ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                temperature: self.config.temperature,
            })
            .send()
            .await
            .context(RequestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu { status, body }.fail();
        }

        let completion: ChatResponse = response.json().await.context(DecodeSnafu)?;
        let text = completion.into_text().context(EmptyResponseSnafu)?;
        debug!(target: LOG_TARGET, raw_len = text.len(), "Received completion");

        validate_post_text(&text)
    }
}
