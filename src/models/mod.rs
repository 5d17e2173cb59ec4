pub mod issue;
pub mod timestamp;

pub use issue::{Issue, IssuesPage};
