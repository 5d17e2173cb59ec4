use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{FilterMode, IssuesQuery, Transport};
use crate::errors::Result;
use crate::models::{Issue, IssuesPage};
use crate::output::{Outputter, Selector};

/// Polling any faster than this hammers the tracker.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    /// Issues newer than the watermark, before the selector ran.
    pub kept: usize,
    pub delivered: usize,
    pub watermark: DateTime<Utc>,
}

/// Polls `issues.json` on a fixed interval and hands every issue changed
/// since the watermark to the outputter, oldest first.
///
/// The crawler owns the watermark. It only moves forward, and only after a
/// whole batch has been delivered.
pub struct Crawler<T, O> {
    query: IssuesQuery,
    interval: Duration,
    transport: T,
    outputter: O,
    selector: Option<Box<dyn Selector>>,
    watermark: DateTime<Utc>,
}

impl<T, O> Crawler<T, O>
where
    T: Transport,
    O: Outputter,
{
    pub fn new(
        query: IssuesQuery,
        interval: Duration,
        transport: T,
        outputter: O,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            query,
            interval: interval.max(MIN_INTERVAL),
            transport,
            outputter,
            selector: None,
            watermark: start,
        }
    }

    pub fn with_selector(mut self, selector: Box<dyn Selector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn build_fetch_url(&self) -> String {
        self.query.build(self.watermark)
    }

    /// Run poll cycles until one fails or `cancel` fires.
    ///
    /// The first cycle runs one interval after the call. Cancellation is only
    /// observed between cycles so a page is never half delivered. A slow
    /// cycle pushes the next tick back instead of bunching ticks up.
    pub async fn crawl(&mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        info!(
            interval_secs = self.interval.as_secs(),
            watermark = %self.watermark,
            mode = ?self.query.filter_mode(),
            "crawler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(watermark = %self.watermark, "crawler cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            self.poll_once().await?;
        }
    }

    /// One fetch, filter, deliver cycle.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        let url = self.build_fetch_url();
        debug!(url = %url, "fetching issues");

        let body = self.transport.get(&url).await?;
        let page: IssuesPage = serde_json::from_str(&body)?;
        let fetched = page.issues.len();
        debug!(fetched, total_count = page.total_count, "page received");

        if fetched == 0 {
            debug!("no updated issues");
            return Ok(self.report(0, 0, 0));
        }

        let mut issues = match self.query.filter_mode() {
            FilterMode::Client => keep_after(page.issues, self.watermark),
            FilterMode::Server => with_timestamps(page.issues),
        };
        sort_newest_first(&mut issues);

        let newest = match issues.first() {
            Some((updated_at, _)) => (*updated_at).max(self.watermark),
            None => {
                debug!(fetched, "nothing newer than watermark");
                return Ok(self.report(fetched, 0, 0));
            }
        };

        let kept = issues.len();
        let mut issues: Vec<Issue> = issues.into_iter().map(|(_, issue)| issue).collect();
        if let Some(selector) = &self.selector {
            issues = filter(issues, |issue| selector.keep(issue));
        }

        let delivered = self.output(&issues).await?;
        self.watermark = newest;

        info!(
            fetched,
            kept,
            delivered,
            watermark = %self.watermark,
            "poll cycle complete"
        );
        Ok(self.report(fetched, kept, delivered))
    }

    /// Deliver newest-first issues in ascending order.
    async fn output(&self, issues: &[Issue]) -> Result<usize> {
        for issue in issues.iter().rev() {
            self.outputter.deliver(issue).await?;
        }
        Ok(issues.len())
    }

    fn report(&self, fetched: usize, kept: usize, delivered: usize) -> CycleReport {
        CycleReport {
            fetched,
            kept,
            delivered,
            watermark: self.watermark,
        }
    }
}

/// Keep issues updated strictly after `watermark`, paired with their parsed
/// timestamp. Issues whose timestamp can't be parsed are dropped because they
/// can't be placed relative to the watermark.
pub fn keep_after(issues: Vec<Issue>, watermark: DateTime<Utc>) -> Vec<(DateTime<Utc>, Issue)> {
    with_timestamps(issues)
        .into_iter()
        .filter(|(updated_at, _)| *updated_at > watermark)
        .collect()
}

fn with_timestamps(issues: Vec<Issue>) -> Vec<(DateTime<Utc>, Issue)> {
    issues
        .into_iter()
        .filter_map(|issue| match issue.updated_at() {
            Ok(updated_at) => Some((updated_at, issue)),
            Err(e) => {
                debug!(id = issue.id, error = %e, "dropping issue with unusable timestamp");
                None
            }
        })
        .collect()
}

/// `updated_on:desc,id:desc`, the order the query asks Redmine for. Already
/// sorted pages are left as they are.
fn sort_newest_first(issues: &mut [(DateTime<Utc>, Issue)]) {
    issues.sort_by(|(a_time, a), (b_time, b)| b_time.cmp(a_time).then(b.id.cmp(&a.id)));
}

pub fn filter<P>(issues: Vec<Issue>, predicate: P) -> Vec<Issue>
where
    P: Fn(&Issue) -> bool,
{
    issues.into_iter().filter(|issue| predicate(issue)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CrawlerError;
    use crate::models::issue::issue_fixture;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct FakeTransport {
        pages: Mutex<VecDeque<Result<String>>>,
        requested: Arc<Mutex<Vec<String>>>,
    }

    impl FakeTransport {
        fn new(pages: Vec<Result<String>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requested: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get(&self, url: &str) -> Result<String> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(page_json(&[])))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingOutputter {
        delivered: Arc<Mutex<Vec<u64>>>,
        fail_on: Option<u64>,
    }

    #[async_trait]
    impl Outputter for RecordingOutputter {
        async fn deliver(&self, issue: &Issue) -> Result<()> {
            if self.fail_on == Some(issue.id) {
                return Err(CrawlerError::DeliveryFailed(format!("rejected #{}", issue.id)));
            }
            self.delivered.lock().unwrap().push(issue.id);
            Ok(())
        }
    }

    fn page_json(issues: &[Issue]) -> String {
        serde_json::json!({
            "issues": issues,
            "total_count": issues.len(),
            "offset": 0,
            "limit": 25,
        })
        .to_string()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 2, 20, 20, 30, 30).unwrap()
    }

    fn crawler(
        query: IssuesQuery,
        pages: Vec<Result<String>>,
        outputter: RecordingOutputter,
    ) -> Crawler<FakeTransport, RecordingOutputter> {
        Crawler::new(
            query,
            Duration::from_secs(10),
            FakeTransport::new(pages),
            outputter,
            start(),
        )
    }

    fn newest_first() -> Vec<Issue> {
        vec![
            issue_fixture(3, "Foo 3", "2015-02-20T20:40:00Z"),
            issue_fixture(2, "Boo 2", "2015-02-20T20:35:00Z"),
            issue_fixture(1, "Foo 1", "2015-02-20T20:31:00Z"),
        ]
    }

    #[test]
    fn test_interval_is_clamped() {
        let c = Crawler::new(
            IssuesQuery::new("https://x", 5),
            Duration::from_secs(3),
            FakeTransport::new(vec![]),
            RecordingOutputter::default(),
            start(),
        );
        assert_eq!(c.interval(), MIN_INTERVAL);
    }

    #[test]
    fn test_build_fetch_url_uses_watermark() {
        let c = crawler(IssuesQuery::new("https://x/redmine", 5), vec![], RecordingOutputter::default());
        assert!(c
            .build_fetch_url()
            .contains("updated_on=%3E%3D2015-02-20T20:30:31Z&limit=5"));
    }

    #[test]
    fn test_filter_empty_issues() {
        let filtered = filter(Vec::new(), |_| true);
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_filter_keeps_order() {
        let issues = vec![
            issue_fixture(1, "Foo 1", "2015-02-20T20:31:00Z"),
            issue_fixture(2, "Boo 2", "2015-02-20T20:32:00Z"),
            issue_fixture(3, "Foo 3", "2015-02-20T20:33:00Z"),
        ];
        let filtered = filter(issues, |issue| issue.subject.starts_with("Foo"));
        let subjects: Vec<&str> = filtered.iter().map(|i| i.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Foo 1", "Foo 3"]);
    }

    #[test]
    fn test_keep_after_is_strict_and_drops_unparseable() {
        let issues = vec![
            issue_fixture(4, "later", "2015-02-20T20:30:31Z"),
            issue_fixture(3, "garbled", "Feb 20 2015"),
            issue_fixture(2, "equal", "2015-02-20T20:30:30Z"),
            issue_fixture(1, "earlier", "2015/02/21 05:30:29 +0900"),
        ];
        let kept: Vec<u64> = keep_after(issues, start())
            .into_iter()
            .map(|(_, issue)| issue.id)
            .collect();
        assert_eq!(kept, vec![4]);
    }

    #[tokio::test]
    async fn test_delivers_in_ascending_order() {
        let outputter = RecordingOutputter::default();
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&newest_first()))],
            outputter.clone(),
        );

        let report = c.poll_once().await.unwrap();

        assert_eq!(*outputter.delivered.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.delivered, 3);
        assert_eq!(
            c.watermark(),
            Utc.with_ymd_and_hms(2015, 2, 20, 20, 40, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_selector_narrows_delivery_but_not_watermark() {
        let outputter = RecordingOutputter::default();
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&newest_first()))],
            outputter.clone(),
        )
        .with_selector(Box::new(|issue: &Issue| issue.subject.starts_with("Foo")));

        let report = c.poll_once().await.unwrap();

        assert_eq!(report.kept, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(*outputter.delivered.lock().unwrap(), vec![1, 3]);
        assert_eq!(
            c.watermark(),
            Utc.with_ymd_and_hms(2015, 2, 20, 20, 40, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_page_leaves_watermark() {
        let outputter = RecordingOutputter::default();
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&[]))],
            outputter.clone(),
        );

        let report = c.poll_once().await.unwrap();

        assert_eq!(report.fetched, 0);
        assert_eq!(c.watermark(), start());
        assert!(outputter.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_client_filter_excludes_already_seen() {
        let outputter = RecordingOutputter::default();
        let issues = vec![
            issue_fixture(5, "new", "2015-02-20T20:45:00Z"),
            issue_fixture(4, "seen", "2015-02-20T20:30:30Z"),
            issue_fixture(3, "old", "2015-02-20T19:00:00Z"),
        ];
        let mut c = crawler(
            IssuesQuery::new("https://x", 25).with_api_key("secret"),
            vec![Ok(page_json(&issues))],
            outputter.clone(),
        );

        c.poll_once().await.unwrap();

        assert_eq!(*outputter.delivered.lock().unwrap(), vec![5]);
        let requested = c.transport.requested.lock().unwrap();
        assert!(!requested[0].contains("updated_on=%3E%3D"));
        assert!(requested[0].contains("key=secret"));
    }

    #[tokio::test]
    async fn test_client_filter_with_nothing_new() {
        let outputter = RecordingOutputter::default();
        let issues = vec![issue_fixture(4, "seen", "2015-02-20T20:30:30Z")];
        let mut c = crawler(
            IssuesQuery::new("https://x", 25).with_api_key("secret"),
            vec![Ok(page_json(&issues))],
            outputter.clone(),
        );

        let report = c.poll_once().await.unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.kept, 0);
        assert_eq!(report.delivered, 0);
        assert_eq!(c.watermark(), start());
        assert!(outputter.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsorted_page_is_resorted() {
        let outputter = RecordingOutputter::default();
        let issues = vec![
            issue_fixture(2, "middle", "2015-02-20T20:35:00Z"),
            issue_fixture(3, "newest", "2015-02-20T20:40:00Z"),
            issue_fixture(1, "oldest", "2015/02/21 05:31:00 +0900"),
        ];
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&issues))],
            outputter.clone(),
        );

        c.poll_once().await.unwrap();

        assert_eq!(*outputter.delivered.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            c.watermark(),
            Utc.with_ymd_and_hms(2015, 2, 20, 20, 40, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_equal_timestamps_break_ties_by_id() {
        let outputter = RecordingOutputter::default();
        let issues = vec![
            issue_fixture(8, "a", "2015-02-20T20:40:00Z"),
            issue_fixture(9, "b", "2015-02-20T20:40:00Z"),
        ];
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&issues))],
            outputter.clone(),
        );

        c.poll_once().await.unwrap();

        assert_eq!(*outputter.delivered.lock().unwrap(), vec![8, 9]);
    }

    #[tokio::test]
    async fn test_watermark_never_moves_backwards() {
        let outputter = RecordingOutputter::default();
        let stale = vec![issue_fixture(1, "stale", "2015-02-20T10:00:00Z")];
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&stale))],
            outputter.clone(),
        );

        c.poll_once().await.unwrap();

        assert_eq!(c.watermark(), start());
    }

    #[tokio::test]
    async fn test_watermark_advances_between_cycles() {
        let outputter = RecordingOutputter::default();
        let second = vec![issue_fixture(4, "next", "2015-02-20T20:50:00Z")];
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&newest_first())), Ok(page_json(&second))],
            outputter.clone(),
        );

        c.poll_once().await.unwrap();
        c.poll_once().await.unwrap();

        let requested = c.transport.requested.lock().unwrap();
        assert!(requested[0].contains("updated_on=%3E%3D2015-02-20T20:30:31Z"));
        assert!(requested[1].contains("updated_on=%3E%3D2015-02-20T20:40:01Z"));
        assert_eq!(*outputter.delivered.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_transport_error_is_returned() {
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Err(CrawlerError::NetworkError("connection refused".to_string()))],
            RecordingOutputter::default(),
        );

        let err = c.poll_once().await.unwrap_err();
        assert!(matches!(err, CrawlerError::NetworkError(_)));
        assert_eq!(c.watermark(), start());
    }

    #[tokio::test]
    async fn test_malformed_body_is_returned() {
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok("<html>login</html>".to_string())],
            RecordingOutputter::default(),
        );

        let err = c.poll_once().await.unwrap_err();
        assert!(matches!(err, CrawlerError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_partial_delivery_and_watermark() {
        let outputter = RecordingOutputter {
            fail_on: Some(2),
            ..Default::default()
        };
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![Ok(page_json(&newest_first()))],
            outputter.clone(),
        );

        let err = c.poll_once().await.unwrap_err();

        assert!(matches!(err, CrawlerError::DeliveryFailed(_)));
        assert_eq!(*outputter.delivered.lock().unwrap(), vec![1]);
        assert_eq!(c.watermark(), start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_stops_on_fetch_error() {
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![
                Ok(page_json(&newest_first())),
                Err(CrawlerError::ApiError(500, "boom".to_string())),
            ],
            RecordingOutputter::default(),
        );

        let err = c.crawl(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, CrawlerError::ApiError(500, _)));
        assert_eq!(
            c.watermark(),
            Utc.with_ymd_and_hms(2015, 2, 20, 20, 40, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_honors_cancellation() {
        let mut c = crawler(
            IssuesQuery::new("https://x", 25),
            vec![],
            RecordingOutputter::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        c.crawl(cancel).await.expect("cancelled crawl is not an error");

        assert!(c.transport.requested.lock().unwrap().is_empty());
    }
}
