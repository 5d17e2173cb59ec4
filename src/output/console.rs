use async_trait::async_trait;
use colored::*;

use super::Outputter;
use crate::errors::Result;
use crate::models::Issue;

/// Prints one line per issue to stdout.
pub struct ConsoleOutputter;

impl ConsoleOutputter {
    pub fn format_line(issue: &Issue) -> String {
        format!(
            "{} {} {} {} {} {}",
            format!("#{}", issue.id).bright_white().bold(),
            issue.tracker.name.cyan(),
            issue.status.name.yellow(),
            issue.priority.name.dimmed(),
            issue.subject,
            issue.updated_on.dimmed()
        )
    }
}

#[async_trait]
impl Outputter for ConsoleOutputter {
    async fn deliver(&self, issue: &Issue) -> Result<()> {
        println!("{}", Self::format_line(issue));
        Ok(())
    }
}
