use colored::*;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CrawlerError {
    // Configuration errors
    ConfigNotFound(PathBuf),
    ConfigInvalid(String),

    // Redmine errors
    ApiError(u16, String),
    MalformedResponse(String),

    // Sink errors
    DeliveryFailed(String),

    // Network errors
    NetworkError(String),

    // Generic error
    Other(String),
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Configuration errors
            CrawlerError::ConfigNotFound(path) => {
                write!(f, "{}\n", "Configuration not found".red().bold())?;
                write!(f, "   {}\n\n", format!("Looked for {}", path.display()).dimmed())?;
                write!(f, "   {}", "redmine-crawler init".green())
            }
            CrawlerError::ConfigInvalid(msg) => {
                write!(f, "{}\n", "Invalid configuration".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Check your config file: ~/.redmine-crawler/config.toml\n")?;
                write!(f, "   2. Check REDMINE_CRAWLER__* environment overrides\n")?;
                write!(f, "   3. Or reinitialize: {}", "redmine-crawler init".green())
            }

            // Redmine errors
            CrawlerError::ApiError(status, msg) => {
                write!(f, "{}\n", format!("Redmine API error ({})", status).red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                if *status == 401 || *status == 403 {
                    write!(f, "   Check that the API key is valid and REST access is enabled")
                } else {
                    write!(f, "   Check the Redmine URL: {}", "redmine-crawler config show".green())
                }
            }
            CrawlerError::MalformedResponse(msg) => {
                write!(f, "{}\n", "Unexpected response from Redmine".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Make sure the URL points at the Redmine home (not a page)\n")?;
                write!(f, "   2. Inspect the request: {}", "redmine-crawler url".green())
            }

            // Sink errors
            CrawlerError::DeliveryFailed(msg) => {
                write!(f, "{}\n", "Failed to deliver issue".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Check the webhook URL, room and token\n")?;
                write!(f, "   2. Resume with --since to avoid re-sending the backlog")
            }

            // Network errors
            CrawlerError::NetworkError(msg) => {
                write!(f, "{}\n", "Network error".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Check your internet connection\n")?;
                write!(f, "   2. Verify you can reach the Redmine endpoint\n")?;
                write!(f, "   3. Raise crawl.timeout_secs if the server is slow")
            }

            // Generic
            CrawlerError::Other(msg) => {
                write!(f, "{}\n", "Error".red().bold())?;
                write!(f, "   {}", msg.dimmed())
            }
        }
    }
}

impl std::error::Error for CrawlerError {}

// Conversion from anyhow::Error
impl From<anyhow::Error> for CrawlerError {
    fn from(err: anyhow::Error) -> Self {
        CrawlerError::Other(err.to_string())
    }
}

impl From<std::io::Error> for CrawlerError {
    fn from(err: std::io::Error) -> Self {
        CrawlerError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(err: serde_json::Error) -> Self {
        CrawlerError::MalformedResponse(err.to_string())
    }
}

impl From<reqwest::Error> for CrawlerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            CrawlerError::NetworkError(err.to_string())
        } else if let Some(status) = err.status() {
            CrawlerError::ApiError(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            CrawlerError::MalformedResponse(err.to_string())
        } else {
            CrawlerError::Other(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
