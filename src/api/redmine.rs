use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::Transport;
use crate::errors::{CrawlerError, Result};

pub struct RedmineClient {
    client: Client,
}

impl RedmineClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("redmine-crawler/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for RedmineClient {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CrawlerError::ApiError(status.as_u16(), text));
        }

        Ok(response.text().await?)
    }
}
