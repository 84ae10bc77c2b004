use std::fmt;
use std::path::PathBuf;

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use time::OffsetDateTime;
use url::Url;

use crate::eligibility::DEFAULT_MIN_PUBLISH_DATE;
use crate::generator::{DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL, LlmConfig};

pub const ACCESS_TOKEN_ENV: &str = "LINKEDIN_ACCESS_TOKEN";
pub const ARTICLES_API_URL_ENV: &str = "ARTICLES_API_URL";
pub const DEFAULT_DATA_DIR: &str = ".";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("{name} not set"))]
    Missing { name: &'static str },
    #[snafu(display("{name} is not a valid URL: {source}"))]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration values as collected from flags and the environment,
/// before validation.
#[derive(Debug, Default, Clone)]
pub struct RawConfig {
    pub access_token: Option<String>,
    pub articles_api_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub min_publish_date: Option<OffsetDateTime>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_temperature: Option<f32>,
    pub dry_run: bool,
}

/// Everything one run needs to know, built once at startup.
#[derive(Clone)]
pub struct Config {
    pub access_token: String,
    pub articles_api_url: Url,
    /// Directory holding the ledger and its backups
    pub data_dir: PathBuf,
    /// Cutoff: older articles are never posted
    pub min_publish_date: OffsetDateTime,
    pub llm: LlmConfig,
    /// Generate the post but don't publish or record it
    pub dry_run: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &"<redacted>")
            .field("articles_api_url", &self.articles_api_url.as_str())
            .field("data_dir", &self.data_dir)
            .field("min_publish_date", &self.min_publish_date)
            .field("llm", &self.llm)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Validate the article source endpoint, which is required.
pub fn articles_api_url(raw: Option<String>) -> ConfigResult<Url> {
    let url = linkpost_util::nonempty(raw).context(MissingSnafu {
        name: ARTICLES_API_URL_ENV,
    })?;
    Url::parse(&url).context(InvalidUrlSnafu {
        name: ARTICLES_API_URL_ENV,
    })
}

impl RawConfig {
    pub fn resolve(self) -> ConfigResult<Config> {
        let access_token = linkpost_util::nonempty(self.access_token).context(MissingSnafu {
            name: ACCESS_TOKEN_ENV,
        })?;
        let articles_api_url = articles_api_url(self.articles_api_url)?;

        let llm_base_url = linkpost_util::nonempty(self.llm_base_url)
            .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_owned());
        let llm_base_url = Url::parse(&llm_base_url).context(InvalidUrlSnafu {
            name: "OPENAI_BASE_URL",
        })?;

        Ok(Config {
            access_token,
            articles_api_url,
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            min_publish_date: self.min_publish_date.unwrap_or(DEFAULT_MIN_PUBLISH_DATE),
            llm: LlmConfig {
                api_key: linkpost_util::nonempty(self.llm_api_key),
                base_url: llm_base_url,
                model: linkpost_util::nonempty(self.llm_model)
                    .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_owned()),
                temperature: self.llm_temperature,
            },
            dry_run: self.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            access_token: Some("token".into()),
            articles_api_url: Some("https://articles.example.com/api/articles".into()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        let config = raw().resolve().unwrap();

        assert_eq!(config.access_token, "token");
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.min_publish_date, DEFAULT_MIN_PUBLISH_DATE);
        assert_eq!(config.llm.model, DEFAULT_LLM_MODEL);
        assert_eq!(config.llm.base_url.as_str(), "https://api.openai.com/v1");
        assert_eq!(config.llm.api_key, None);
        assert!(!config.dry_run);
    }

    #[test]
    fn missing_access_token() {
        let err = RawConfig {
            access_token: None,
            ..raw()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name } if name == ACCESS_TOKEN_ENV));
        assert_eq!(err.to_string(), "LINKEDIN_ACCESS_TOKEN not set");
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = RawConfig {
            articles_api_url: Some("  ".into()),
            ..raw()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name } if name == ARTICLES_API_URL_ENV));
    }

    #[test]
    fn invalid_articles_url() {
        let err = RawConfig {
            articles_api_url: Some("not a url".into()),
            ..raw()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { name, .. } if name == ARTICLES_API_URL_ENV));
    }

    #[test]
    fn overrides_are_kept() {
        let config = RawConfig {
            data_dir: Some("/var/lib/linkpost".into()),
            min_publish_date: Some(datetime!(2026-03-01 00:00 UTC)),
            llm_api_key: Some("sk-1".into()),
            llm_model: Some("gpt-4o-mini".into()),
            llm_temperature: Some(0.7),
            dry_run: true,
            ..raw()
        }
        .resolve()
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/linkpost"));
        assert_eq!(config.min_publish_date, datetime!(2026-03-01 00:00 UTC));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-1"));
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.temperature, Some(0.7));
        assert!(config.dry_run);
    }

    #[test]
    fn debug_hides_secrets() {
        let config = RawConfig {
            llm_api_key: Some("sk-secret".into()),
            ..raw()
        }
        .resolve()
        .unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("\"token\""));
        assert!(!debug.contains("sk-secret"));
    }
}
