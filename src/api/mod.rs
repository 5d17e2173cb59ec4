pub mod query;
pub mod redmine;

use async_trait::async_trait;

use crate::errors::Result;

pub use query::{FilterMode, IssuesQuery};
pub use redmine::RedmineClient;

/// Fetches a request target and returns the raw response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<String>;
}
