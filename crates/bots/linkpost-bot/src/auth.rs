//! One-time OAuth setup that produces the long-lived access token.
//!
//! Interactive: the user approves the app in a browser, LinkedIn redirects to
//! a listener on localhost, and the code from that redirect is exchanged for
//! a token. Not part of regular runs.

use std::fmt;
use std::io;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use reqwest::Client;
use serde::Deserialize;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, info, warn};
use url::Url;

const LOG_TARGET: &str = "linkpost::auth";

pub const AUTHORIZATION_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
pub const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
pub const REDIRECT_URI: &str = "http://localhost:8000/callback";
pub const CALLBACK_LISTEN_ADDR: &str = "127.0.0.1:8000";
pub const SCOPES: &[&str] = &["openid", "profile", "w_member_social"];

pub const CLIENT_ID_ENV: &str = "LINKEDIN_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "LINKEDIN_CLIENT_SECRET";

#[derive(Debug, Snafu)]
pub enum AuthError {
    #[snafu(display("{name} not set"))]
    MissingCredential { name: &'static str },
    #[snafu(display("Invalid OAuth endpoint: {source}"))]
    Endpoint { source: url::ParseError },
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Failed to listen on {addr}: {source}"))]
    Bind { addr: String, source: io::Error },
    #[snafu(display("Callback server failed: {source}"))]
    Serve { source: io::Error },
    #[snafu(display("Token request failed: {source}"))]
    Exchange { source: reqwest::Error },
    #[snafu(display("Token endpoint responded with {status}: {body}"))]
    ExchangeStatus { status: StatusCode, body: String },
    #[snafu(display("Failed to decode token response: {source}"))]
    Decode { source: reqwest::Error },
    #[snafu(display("Authorization was denied: {error}"))]
    Denied { error: String },
    #[snafu(display("Callback server stopped without a result"))]
    NoCallback,
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> AuthResult<Self> {
        Ok(Self {
            client_id: linkpost_util::nonempty(client_id).context(MissingCredentialSnafu {
                name: CLIENT_ID_ENV,
            })?,
            client_secret: linkpost_util::nonempty(client_secret).context(
                MissingCredentialSnafu {
                    name: CLIENT_SECRET_ENV,
                },
            )?,
        })
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: u64,
}

impl TokenResponse {
    pub fn expires_in_days(&self) -> u64 {
        self.expires_in / 86_400
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OAuthFlow {
    credentials: ClientCredentials,
    token_url: Url,
    client: Client,
}

impl OAuthFlow {
    pub fn new(credentials: ClientCredentials) -> AuthResult<Self> {
        Ok(Self {
            credentials,
            token_url: Url::parse(TOKEN_URL).context(EndpointSnafu)?,
            client: Client::builder()
                .user_agent(concat!("linkpost-bot/", env!("CARGO_PKG_VERSION")))
                .build()
                .context(ClientSnafu)?,
        })
    }

    pub fn with_token_url(self, token_url: Url) -> Self {
        Self { token_url, ..self }
    }

    /// Page the user has to visit to approve the app.
    pub fn authorization_url(&self) -> AuthResult<Url> {
        Url::parse_with_params(
            AUTHORIZATION_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", REDIRECT_URI),
                ("scope", &SCOPES.join(" ")),
            ],
        )
        .context(EndpointSnafu)
    }

    pub async fn exchange_code(&self, code: &str) -> AuthResult<TokenResponse> {
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .context(ExchangeSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return ExchangeStatusSnafu { status, body }.fail();
        }

        response.json().await.context(DecodeSnafu)
    }

    /// Serve `listener` until the first `/callback` request has been
    /// handled, and return the token obtained from it.
    pub async fn await_callback(&self, listener: TcpListener) -> AuthResult<TokenResponse> {
        let (result_tx, result_rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            flow: self.clone(),
            result_tx: Mutex::new(Some(result_tx)),
            done: Notify::new(),
        });

        let router = Router::new()
            .route("/callback", get(handle_callback))
            .with_state(state.clone());

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { state.done.notified().await })
            .await
            .context(ServeSnafu)?;

        result_rx.await.ok().context(NoCallbackSnafu)?
    }
}

/// Run the whole interactive flow on [`CALLBACK_LISTEN_ADDR`].
pub async fn obtain_token(credentials: ClientCredentials) -> AuthResult<TokenResponse> {
    let flow = OAuthFlow::new(credentials)?;
    let auth_url = flow.authorization_url()?;

    let listener = TcpListener::bind(CALLBACK_LISTEN_ADDR)
        .await
        .context(BindSnafu {
            addr: CALLBACK_LISTEN_ADDR,
        })?;

    println!("Opening browser for LinkedIn authorization...");
    println!();
    println!("If the browser doesn't open, visit:");
    println!("{auth_url}");
    println!();
    if let Err(err) = duct::cmd!("xdg-open", auth_url.as_str()).run() {
        warn!(target: LOG_TARGET, %err, "Failed to open browser");
    }

    println!("Waiting for authorization callback on {REDIRECT_URI} ...");
    flow.await_callback(listener).await
}

struct CallbackState {
    flow: OAuthFlow,
    result_tx: Mutex<Option<oneshot::Sender<AuthResult<TokenResponse>>>>,
    done: Notify,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    let Some(result_tx) = state.result_tx.lock().await.take() else {
        return (
            StatusCode::GONE,
            Html("<h1>Error</h1><p>Authorization was already handled.</p>".to_owned()),
        );
    };

    let (result, response) = match params.code {
        Some(code) => {
            info!(target: LOG_TARGET, "Authorization code received");
            match state.flow.exchange_code(&code).await {
                Ok(token) => (
                    Ok(token),
                    (
                        StatusCode::OK,
                        Html(
                            "<h1>Success!</h1><p>You can close this window. \
                             Check your terminal for the access token.</p>"
                                .to_owned(),
                        ),
                    ),
                ),
                Err(err) => (
                    Err(err),
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Html("<h1>Error</h1><p>Failed to get token.</p>".to_owned()),
                    ),
                ),
            }
        }
        None => {
            let error = params
                .error_description
                .or(params.error)
                .unwrap_or_else(|| "Unknown error".to_owned());
            let page = format!("<h1>Error</h1><p>{}</p>", escape_html(&error));
            (
                DeniedSnafu { error }.fail(),
                (StatusCode::BAD_REQUEST, Html(page)),
            )
        }
    };

    if result_tx.send(result).is_err() {
        debug!(target: LOG_TARGET, "Nobody is waiting for the callback result");
    }
    state.done.notify_one();

    response
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
