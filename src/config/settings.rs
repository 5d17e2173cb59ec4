use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::query::{IssuesQuery, DEFAULT_SORT, DEFAULT_STATUS_ID};
use crate::crawler::MIN_INTERVAL;
use crate::errors::CrawlerError;
use crate::output::{AllOf, Selector, StatusSelector, SubjectPrefixSelector, WebhookSettings};

const ENV_PREFIX: &str = "REDMINE_CRAWLER";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub redmine: RedmineConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub select: SelectConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedmineConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub client_side_filter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub interval_secs: u64,
    pub limit: u32,
    pub sort: String,
    pub status_id: String,
    pub timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            interval_secs: MIN_INTERVAL.as_secs(),
            limit: 25,
            sort: DEFAULT_SORT.to_string(),
            status_id: DEFAULT_STATUS_ID.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Console,
    Webhook,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub sink: SinkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: String,
    pub room_id: String,
    pub token: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    "yellow".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelectConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_prefix: Option<String>,
}

impl Settings {
    /// Load a config file, overlaid with `REDMINE_CRAWLER__*` variables.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when given.
    fn load_with_env(path: &Path, env: Option<::config::Map<String, String>>) -> Result<Self> {
        if !path.exists() {
            return Err(CrawlerError::ConfigNotFound(path.to_path_buf()).into());
        }

        let settings: Settings = ::config::Config::builder()
            .add_source(::config::File::from(path.to_path_buf()).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .source(env),
            )
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| CrawlerError::ConfigInvalid(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), CrawlerError> {
        if self.redmine.url.trim().is_empty() {
            return Err(CrawlerError::ConfigInvalid("redmine.url must not be empty".to_string()));
        }
        if !self.redmine.url.starts_with("http://") && !self.redmine.url.starts_with("https://") {
            return Err(CrawlerError::ConfigInvalid(format!(
                "redmine.url must start with http:// or https:// (got '{}')",
                self.redmine.url
            )));
        }
        if self.output.sink == SinkKind::Webhook && self.output.webhook.is_none() {
            return Err(CrawlerError::ConfigInvalid(
                "output.sink is 'webhook' but [output.webhook] is missing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let config_str = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, config_str)
            .context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".redmine-crawler"))
    }

    pub fn query(&self) -> IssuesQuery {
        let mut query = IssuesQuery::new(self.redmine.url.clone(), self.crawl.limit);
        if let Some(key) = &self.redmine.api_key {
            query = query.with_api_key(key.clone());
        }
        query.sort = self.crawl.sort.clone();
        query.status_id = self.crawl.status_id.clone();
        query.client_side_filter = self.redmine.client_side_filter;
        query
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.crawl.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.crawl.timeout_secs)
    }

    pub fn webhook_settings(&self) -> Option<WebhookSettings> {
        self.output.webhook.as_ref().map(|hook| WebhookSettings {
            base_url: hook.url.clone(),
            room_id: hook.room_id.clone(),
            token: hook.token.clone(),
            color: hook.color.clone(),
            redmine_url: self.redmine.url.clone(),
        })
    }

    /// Configured selectors combined with AND, or `None` to keep everything.
    pub fn selector(&self) -> Option<Box<dyn Selector>> {
        let mut selectors: Vec<Box<dyn Selector>> = Vec::new();
        if !self.select.statuses.is_empty() {
            selectors.push(Box::new(StatusSelector::new(self.select.statuses.clone())));
        }
        if let Some(prefix) = self.select.subject_prefix.as_ref().filter(|p| !p.is_empty()) {
            selectors.push(Box::new(SubjectPrefixSelector::new(prefix.clone())));
        }

        match selectors.len() {
            0 => None,
            1 => selectors.pop(),
            _ => Some(Box::new(AllOf::new(selectors)) as Box<dyn Selector>),
        }
    }
}

/// Show the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}
