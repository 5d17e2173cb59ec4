use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::Outputter;
use crate::errors::{CrawlerError, Result};
use crate::models::Issue;

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub base_url: String,
    pub room_id: String,
    pub token: String,
    pub color: String,
    /// Redmine home, used to link each notification to its issue.
    pub redmine_url: String,
}

/// Posts a text notification per issue to a chat room.
pub struct RoomNotifier {
    client: Client,
    settings: WebhookSettings,
}

#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    message: String,
    color: &'a str,
    message_format: &'a str,
}

impl RoomNotifier {
    pub fn new(settings: WebhookSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn create_message(&self, issue: &Issue) -> String {
        let mut issue_url = self.settings.redmine_url.clone();
        if !issue_url.ends_with('/') {
            issue_url.push('/');
        }
        issue_url.push_str(&format!("issues/{}", issue.id));

        format!(
            "{} #{} ({}) : [{} / author : {}] assigned to : {} - {}",
            issue.tracker.name,
            issue.id,
            issue.status.name,
            issue.subject,
            issue.author.name,
            issue.assignee_name(),
            issue_url
        )
    }

    fn notification_url(&self) -> String {
        format!(
            "{}/v2/room/{}/notification",
            self.settings.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.settings.room_id)
        )
    }
}

#[async_trait]
impl Outputter for RoomNotifier {
    async fn deliver(&self, issue: &Issue) -> Result<()> {
        let payload = NotificationPayload {
            message: self.create_message(issue),
            color: &self.settings.color,
            message_format: "text",
        };

        let response = self
            .client
            .post(self.notification_url())
            .bearer_auth(&self.settings.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CrawlerError::DeliveryFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CrawlerError::DeliveryFailed(format!(
                "chat API error ({}): {}",
                status, text
            )));
        }

        Ok(())
    }
}
