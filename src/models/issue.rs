use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp::{self, TimestampError};

/// One issue snapshot as returned by `issues.json`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Issue {
    pub id: u64,
    pub project: Term,
    pub tracker: Term,
    pub status: Term,
    pub priority: Term,
    pub author: Term,
    #[serde(default)]
    pub category: Option<Term>,
    #[serde(default)]
    pub assigned_to: Option<Term>,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_on: String,
    pub updated_on: String,
}

/// An `{ "id": .., "name": .. }` pair used for every categorical attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Term {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IssuesPage {
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub limit: u32,
}

impl Issue {
    pub fn updated_at(&self) -> Result<DateTime<Utc>, TimestampError> {
        timestamp::normalize(&self.updated_on)
    }

    pub fn assignee_name(&self) -> &str {
        self.assigned_to
            .as_ref()
            .map(|term| term.name.as_str())
            .unwrap_or("-")
    }
}

#[cfg(test)]
pub(crate) fn issue_fixture(id: u64, subject: &str, updated_on: &str) -> Issue {
    let term = |name: &str| Term {
        id: 1,
        name: name.to_string(),
    };
    Issue {
        id,
        project: term("Crawler"),
        tracker: term("Bug"),
        status: term("New"),
        priority: term("Normal"),
        author: term("Alice"),
        category: None,
        assigned_to: None,
        subject: subject.to_string(),
        description: None,
        created_on: "2015-02-01T00:00:00Z".to_string(),
        updated_on: updated_on.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAGE: &str = r#"{
        "issues": [
            {
                "id": 42,
                "project": {"id": 1, "name": "Crawler"},
                "tracker": {"id": 1, "name": "Bug"},
                "status": {"id": 2, "name": "In Progress"},
                "priority": {"id": 4, "name": "High"},
                "author": {"id": 5, "name": "Alice"},
                "assigned_to": {"id": 6, "name": "Bob"},
                "category": {"id": 3, "name": "Backend"},
                "subject": "Watermark regresses",
                "description": "Seen after restart",
                "start_date": "2015-02-18",
                "done_ratio": 0,
                "created_on": "2015/02/18 10:00:00 +0900",
                "updated_on": "2015-02-20T20:30:30Z"
            }
        ],
        "total_count": 1,
        "offset": 0,
        "limit": 25
    }"#;

    #[test]
    fn test_deserialize_page() {
        let page: IssuesPage = serde_json::from_str(PAGE).expect("should deserialize");
        assert_eq!(page.total_count, 1);
        assert_eq!(page.limit, 25);

        let issue = &page.issues[0];
        assert_eq!(issue.id, 42);
        assert_eq!(issue.status.name, "In Progress");
        assert_eq!(issue.assignee_name(), "Bob");
        assert_eq!(issue.category.as_ref().map(|c| c.name.as_str()), Some("Backend"));
        assert_eq!(
            issue.updated_at().unwrap(),
            Utc.with_ymd_and_hms(2015, 2, 20, 20, 30, 30).unwrap()
        );
        assert_eq!(issue.created_on, "2015/02/18 10:00:00 +0900");
    }

    #[test]
    fn test_deserialize_without_optional_terms() {
        let json = r#"{
            "id": 7,
            "project": {"id": 1, "name": "Crawler"},
            "tracker": {"id": 1, "name": "Feature"},
            "status": {"id": 1, "name": "New"},
            "priority": {"id": 2, "name": "Normal"},
            "author": {"id": 5, "name": "Alice"},
            "subject": "Unassigned",
            "created_on": "2015-02-20T20:30:30Z",
            "updated_on": "2015-02-20T20:30:30Z"
        }"#;
        let issue: Issue = serde_json::from_str(json).expect("should deserialize");
        assert!(issue.assigned_to.is_none());
        assert!(issue.description.is_none());
        assert_eq!(issue.assignee_name(), "-");
    }

    #[test]
    fn test_empty_page() {
        let page: IssuesPage =
            serde_json::from_str(r#"{"issues": [], "total_count": 0, "offset": 0, "limit": 25}"#)
                .unwrap();
        assert!(page.issues.is_empty());
    }

    #[test]
    fn test_bad_timestamp_does_not_break_decoding() {
        let issue = issue_fixture(1, "Odd clock", "20/02/2015");
        let encoded = serde_json::to_string(&issue).unwrap();
        let decoded: Issue = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.updated_at().is_err());
    }
}
