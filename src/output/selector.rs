use super::Selector;
use crate::models::Issue;

/// Keeps issues whose status name is in the list.
pub struct StatusSelector {
    statuses: Vec<String>,
}

impl StatusSelector {
    pub fn new(statuses: Vec<String>) -> Self {
        Self { statuses }
    }
}

impl Selector for StatusSelector {
    fn keep(&self, issue: &Issue) -> bool {
        self.statuses.iter().any(|status| *status == issue.status.name)
    }
}

pub struct SubjectPrefixSelector {
    prefix: String,
}

impl SubjectPrefixSelector {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Selector for SubjectPrefixSelector {
    fn keep(&self, issue: &Issue) -> bool {
        issue.subject.starts_with(&self.prefix)
    }
}

/// Keeps an issue only when every inner selector does.
pub struct AllOf {
    selectors: Vec<Box<dyn Selector>>,
}

impl AllOf {
    pub fn new(selectors: Vec<Box<dyn Selector>>) -> Self {
        Self { selectors }
    }
}

impl Selector for AllOf {
    fn keep(&self, issue: &Issue) -> bool {
        self.selectors.iter().all(|selector| selector.keep(issue))
    }
}
