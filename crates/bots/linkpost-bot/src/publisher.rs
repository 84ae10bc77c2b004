use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tracing::{info, warn};
use url::Url;

const LOG_TARGET: &str = "linkpost::publisher";

pub const LINKEDIN_USERINFO_URL: &str = "https://api.linkedin.com/v2/userinfo";
pub const LINKEDIN_UGC_POSTS_URL: &str = "https://api.linkedin.com/v2/ugcPosts";
pub const RESTLI_PROTOCOL_VERSION: &str = "2.0.0";
const RESTLI_ID_HEADER: &str = "x-restli-id";

#[derive(Debug, Snafu)]
pub enum PublishError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Invalid LinkedIn endpoint: {source}"))]
    Endpoint { source: url::ParseError },
    #[snafu(display("HTTP request failed: {source}"))]
    Http { source: reqwest::Error },
    #[snafu(display("LinkedIn responded with {status}: {body}"))]
    Status { status: StatusCode, body: String },
    #[snafu(display("Failed to decode LinkedIn response: {source}"))]
    Decode { source: reqwest::Error },
}

pub type PublishResult<T> = std::result::Result<T, PublishError>;

#[async_trait::async_trait]
pub trait Publisher {
    /// Id of the member the access token belongs to.
    async fn resolve_identity(&self, access_token: &str) -> PublishResult<String>;

    /// Share `text` with a link to `article_url`, returning the post id.
    async fn publish(
        &self,
        access_token: &str,
        user_id: &str,
        text: &str,
        article_url: &str,
    ) -> PublishResult<String>;
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
}

#[derive(Debug, Deserialize)]
struct UgcPostCreated {
    #[serde(default)]
    id: Option<String>,
}

/// Request body of a public article share authored by `user_id`.
pub fn ugc_post_payload(user_id: &str, text: &str, article_url: &str) -> serde_json::Value {
    serde_json::json!({
        "author": format!("urn:li:person:{user_id}"),
        "lifecycleState": "PUBLISHED",
        "specificContent": {
            "com.linkedin.ugc.ShareContent": {
                "shareCommentary": { "text": text },
                "shareMediaCategory": "ARTICLE",
                "media": [
                    {
                        "status": "READY",
                        "originalUrl": article_url,
                    }
                ],
            }
        },
        "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
    })
}

/// Post id from a successful create response: the body's `id`, falling back
/// to the `x-restli-id` header.
fn created_post_id(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    serde_json::from_slice::<UgcPostCreated>(body)
        .ok()
        .and_then(|created| created.id)
        .filter(|id| !id.is_empty())
        .or_else(|| {
            headers
                .get(RESTLI_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        })
}

async fn check_status(response: reqwest::Response) -> PublishResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    StatusSnafu { status, body }.fail()
}

pub struct LinkedInPublisher {
    client: Client,
    userinfo_url: Url,
    ugc_posts_url: Url,
}

impl LinkedInPublisher {
    pub fn new() -> PublishResult<Self> {
        Self::with_endpoints(LINKEDIN_USERINFO_URL, LINKEDIN_UGC_POSTS_URL)
    }

    pub fn with_endpoints(userinfo_url: &str, ugc_posts_url: &str) -> PublishResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("linkpost-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(ClientSnafu)?;

        Ok(Self {
            client,
            userinfo_url: Url::parse(userinfo_url).context(EndpointSnafu)?,
            ugc_posts_url: Url::parse(ugc_posts_url).context(EndpointSnafu)?,
        })
    }
}

#[async_trait::async_trait]
impl Publisher for LinkedInPublisher {
    async fn resolve_identity(&self, access_token: &str) -> PublishResult<String> {
        let response = self
            .client
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .context(HttpSnafu)?;

        let user_info: UserInfo = check_status(response)
            .await?
            .json()
            .await
            .context(DecodeSnafu)?;

        info!(target: LOG_TARGET, user_id = %user_info.sub, "Resolved LinkedIn identity");
        Ok(user_info.sub)
    }

    async fn publish(
        &self,
        access_token: &str,
        user_id: &str,
        text: &str,
        article_url: &str,
    ) -> PublishResult<String> {
        info!(target: LOG_TARGET, article_url = %article_url, "Publishing post to LinkedIn");

        let response = self
            .client
            .post(self.ugc_posts_url.clone())
            .bearer_auth(access_token)
            .header("X-Restli-Protocol-Version", RESTLI_PROTOCOL_VERSION)
            .json(&ugc_post_payload(user_id, text, article_url))
            .send()
            .await
            .context(HttpSnafu)?;

        let response = check_status(response).await?;
        let headers = response.headers().clone();
        // The post exists at this point; a body we can't read only costs
        // us the id, so it must not fail the publish.
        let body = match response.bytes().await {
            Ok(body) => body.to_vec(),
            Err(err) => {
                warn!(target: LOG_TARGET, %err, "Failed to read publish response body");
                Vec::new()
            }
        };

        let post_id = created_post_id(&headers, &body).unwrap_or_else(|| {
            warn!(target: LOG_TARGET, "LinkedIn did not return a post id");
            String::new()
        });

        info!(target: LOG_TARGET, post_id = %post_id, "Published post to LinkedIn");
        Ok(post_id)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use reqwest::header::HeaderValue;
    use tokio::net::TcpListener;

    use super::*;

    const TOKEN: &str = "good-token";

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("authorization")?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    async fn userinfo(headers: HeaderMap) -> Response {
        if bearer(&headers) != Some(TOKEN) {
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
        Json(serde_json::json!({ "sub": "abc123", "name": "Jane Doe" })).into_response()
    }

    /// Accepts a share like LinkedIn does: `201`, empty body, id in a header.
    async fn ugc_posts(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
        let protocol = headers
            .get("x-restli-protocol-version")
            .and_then(|v| v.to_str().ok());
        if bearer(&headers) != Some(TOKEN) || protocol != Some(RESTLI_PROTOCOL_VERSION) {
            return (StatusCode::BAD_REQUEST, "missing headers").into_response();
        }
        if body["author"] == "urn:li:person:blocked" {
            return (StatusCode::UNPROCESSABLE_ENTITY, "member may not post").into_response();
        }
        (StatusCode::CREATED, [(RESTLI_ID_HEADER, "urn:li:share:42")]).into_response()
    }

    async fn serve_linkedin() -> SocketAddr {
        let router = Router::new()
            .route("/v2/userinfo", get(userinfo))
            .route("/v2/ugcPosts", post(ugc_posts));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    async fn local_publisher() -> LinkedInPublisher {
        let addr = serve_linkedin().await;
        LinkedInPublisher::with_endpoints(
            &format!("http://{addr}/v2/userinfo"),
            &format!("http://{addr}/v2/ugcPosts"),
        )
        .unwrap()
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn resolves_identity_with_bearer_token() {
        let publisher = local_publisher().await;

        assert_eq!(publisher.resolve_identity(TOKEN).await.unwrap(), "abc123");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn rejected_token_is_publish_error() {
        let publisher = local_publisher().await;

        assert!(matches!(
            publisher.resolve_identity("expired-token").await,
            Err(PublishError::Status { status, ref body })
                if status == StatusCode::UNAUTHORIZED && body == "invalid token"
        ));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn publish_takes_post_id_from_header() {
        let publisher = local_publisher().await;

        let post_id = publisher
            .publish(TOKEN, "abc123", "Fresh post!", "https://blog.example.com/a")
            .await
            .unwrap();

        assert_eq!(post_id, "urn:li:share:42");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn rejected_share_is_publish_error() {
        let publisher = local_publisher().await;

        assert!(matches!(
            publisher
                .publish(TOKEN, "blocked", "Fresh post!", "https://blog.example.com/a")
                .await,
            Err(PublishError::Status { status, .. }) if status == StatusCode::UNPROCESSABLE_ENTITY
        ));
        assert!(matches!(
            publisher
                .publish("expired-token", "abc123", "Fresh post!", "https://blog.example.com/a")
                .await,
            Err(PublishError::Status { status, .. }) if status == StatusCode::BAD_REQUEST
        ));
    }

    #[test]
    fn payload_shares_article_publicly() {
        let payload = ugc_post_payload("abc123", "Fresh post!", "https://blog.example.com/a");

        assert_eq!(payload["author"], "urn:li:person:abc123");
        assert_eq!(payload["lifecycleState"], "PUBLISHED");

        let share = &payload["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareCommentary"]["text"], "Fresh post!");
        assert_eq!(share["shareMediaCategory"], "ARTICLE");
        assert_eq!(share["media"][0]["status"], "READY");
        assert_eq!(share["media"][0]["originalUrl"], "https://blog.example.com/a");

        assert_eq!(
            payload["visibility"]["com.linkedin.ugc.MemberNetworkVisibility"],
            "PUBLIC"
        );
    }

    #[test]
    fn post_id_prefers_body() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RESTLI_ID_HEADER,
            HeaderValue::from_static("urn:li:share:header"),
        );

        assert_eq!(
            created_post_id(&headers, br#"{"id":"urn:li:share:body"}"#).as_deref(),
            Some("urn:li:share:body")
        );
        assert_eq!(
            created_post_id(&headers, b"").as_deref(),
            Some("urn:li:share:header")
        );
        assert_eq!(
            created_post_id(&headers, br#"{"id":""}"#).as_deref(),
            Some("urn:li:share:header")
        );
    }

    #[test]
    fn post_id_missing_everywhere() {
        assert_eq!(created_post_id(&HeaderMap::new(), b"{}"), None);
        assert_eq!(created_post_id(&HeaderMap::new(), b"not json"), None);
    }

    #[test]
    fn userinfo_needs_sub() {
        let info: UserInfo =
            serde_json::from_str(r#"{"sub":"abc123","name":"Jane Doe"}"#).unwrap();
        assert_eq!(info.sub, "abc123");
        assert!(serde_json::from_str::<UserInfo>(r#"{"name":"Jane Doe"}"#).is_err());
    }
}
