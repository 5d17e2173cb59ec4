pub mod console;
pub mod selector;
pub mod webhook;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::Issue;

pub use console::ConsoleOutputter;
pub use selector::{AllOf, StatusSelector, SubjectPrefixSelector};
pub use webhook::{RoomNotifier, WebhookSettings};

/// Receives each new issue, oldest first. An error stops the crawler.
#[async_trait]
pub trait Outputter: Send + Sync {
    async fn deliver(&self, issue: &Issue) -> Result<()>;
}

/// Narrows the issues handed to an [`Outputter`].
pub trait Selector: Send + Sync {
    fn keep(&self, issue: &Issue) -> bool;
}

impl<F> Selector for F
where
    F: Fn(&Issue) -> bool + Send + Sync,
{
    fn keep(&self, issue: &Issue) -> bool {
        self(issue)
    }
}
