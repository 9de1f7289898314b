use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, trace, warn};

use crate::wikitext::link_targets;

/// Served instead of markup when the remote side is struggling.
pub const FAILURE_PAGE_MARKER: &str = "<!DOCTYPE html>";
const REDIRECT_MARKER: &str = "#REDIRECT";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request for {title:?} failed: {source}")]
    Transport {
        title: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} for {title:?}")]
    Status { title: String, status: u16 },
}

impl FetchError {
    /// Rate limiting, server errors and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

#[async_trait]
pub trait MarkupFetcher: Send + Sync {
    async fn fetch(&self, title: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Fetching,
    Retrying,
    Redirected,
    Succeeded,
    FailedPermanently,
}

impl JobState {
    pub fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending | Retrying | Redirected, Fetching)
                | (Fetching, Succeeded | Retrying | Redirected | FailedPermanently)
                | (Pending | Retrying | Redirected, FailedPermanently)
        )
    }
}

#[derive(Debug, Clone)]
pub struct FetchJob {
    pub id: String,
    /// Title taken from the dump, before any redirect.
    pub requested: String,
    pub title: String,
    pub attempts: u32,
    pub state: JobState,
}

impl FetchJob {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        FetchJob {
            id: id.into(),
            requested: title.clone(),
            title,
            attempts: 0,
            state: JobState::Pending,
        }
    }

    fn advance(&mut self, next: JobState) {
        if !self.state.can_become(next) {
            warn!("{}: unexpected transition {:?} -> {:?}", self.id, self.state, next);
        }
        trace!("{}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Markup(String),
    FailurePage,
    Redirect(String),
}

pub fn classify(body: String) -> Response {
    let head = body.trim_start();
    if starts_with_ignore_case(head, FAILURE_PAGE_MARKER) {
        return Response::FailurePage;
    }
    if starts_with_ignore_case(head, REDIRECT_MARKER) {
        if let Some(target) = link_targets(head).into_iter().next() {
            return Response::Redirect(target);
        }
    }
    Response::Markup(body)
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before the attempt after `attempt`: doubles each time, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedPage {
    pub id: String,
    pub requested: String,
    pub title: String,
    pub wikitext: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Exhausted,
    RedirectCycle(String),
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exhausted => f.write_str("retries exhausted"),
            FailureReason::RedirectCycle(title) => write!(f, "redirect cycle at {:?}", title),
            FailureReason::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedJob {
    pub id: String,
    pub title: String,
    pub attempts: u32,
    pub reason: FailureReason,
}

#[derive(Debug)]
pub enum JobOutcome {
    Downloaded(DownloadedPage),
    Failed(FailedJob),
}

pub struct DownloadWorker<F> {
    fetcher: F,
    policy: RetryPolicy,
}

impl<F: MarkupFetcher> DownloadWorker<F> {
    pub fn new(fetcher: F, policy: RetryPolicy) -> Self {
        DownloadWorker { fetcher, policy }
    }

    /// Drive one job to success or permanent failure. Every fetch, redirects
    /// included, spends one attempt; only a retry waits before fetching.
    pub async fn process(&self, mut job: FetchJob) -> JobOutcome {
        let mut visited = HashSet::from([job.title.clone()]);

        loop {
            if job.attempts >= self.policy.max_attempts {
                warn!("Giving up on {} after {} attempts", job.title, job.attempts);
                return fail(job, FailureReason::Exhausted);
            }
            if job.state == JobState::Retrying {
                tokio::time::sleep(self.policy.delay(job.attempts)).await;
            }
            job.attempts += 1;
            job.advance(JobState::Fetching);

            match self.fetcher.fetch(&job.title).await {
                Ok(body) => match classify(body) {
                    Response::Markup(wikitext) => {
                        job.advance(JobState::Succeeded);
                        debug!("Downloaded {} ({}) after {} attempts", job.id, job.title, job.attempts);
                        return JobOutcome::Downloaded(DownloadedPage {
                            id: job.id,
                            requested: job.requested,
                            title: job.title,
                            wikitext,
                            attempts: job.attempts,
                        });
                    }
                    Response::Redirect(target) => {
                        if !visited.insert(target.clone()) {
                            warn!("Redirect cycle for {}: {} -> {}", job.id, job.title, target);
                            return fail(job, FailureReason::RedirectCycle(target));
                        }
                        info!("{} redirects to {}", job.title, target);
                        job.title = target;
                        job.advance(JobState::Redirected);
                    }
                    Response::FailurePage => {
                        warn!("Failure page for {} (attempt {}/{})", job.title, job.attempts, self.policy.max_attempts);
                        job.advance(JobState::Retrying);
                    }
                },
                Err(e) if e.is_transient() => {
                    warn!("{} (attempt {}/{})", e, job.attempts, self.policy.max_attempts);
                    job.advance(JobState::Retrying);
                }
                Err(e) => return fail(job, FailureReason::Rejected(e.to_string())),
            }
        }
    }
}

fn fail(mut job: FetchJob, reason: FailureReason) -> JobOutcome {
    job.advance(JobState::FailedPermanently);
    JobOutcome::Failed(FailedJob {
        id: job.id,
        title: job.title,
        attempts: job.attempts,
        reason,
    })
}

/// Pull jobs until the queue closes, with at most `concurrency` in flight.
/// Returns once every started job has reported its outcome.
pub async fn run_workers<F: MarkupFetcher + 'static>(
    worker: Arc<DownloadWorker<F>>,
    mut jobs: mpsc::Receiver<FetchJob>,
    concurrency: usize,
    results: mpsc::Sender<JobOutcome>,
) {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    while let Some(job) = jobs.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let worker = Arc::clone(&worker);
        let results = results.clone();

        tokio::spawn(async move {
            let outcome = worker.process(job).await;
            if results.send(outcome).await.is_err() {
                warn!("Result receiver dropped");
            }
            drop(permit);
        });
    }

    // All permits back means every spawned job has finished.
    if semaphore.acquire_many(concurrency as u32).await.is_err() {
        warn!("Worker pool closed early");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Replays canned responses per title, in order. Titles with no script
    /// left answer with plain markup.
    #[derive(Default)]
    struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, VecDeque<Result<String, u16>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn script(self, title: &str, responses: Vec<Result<&str, u16>>) -> Self {
            let queue = responses
                .into_iter()
                .map(|r| r.map(str::to_string))
                .collect();
            self.scripts.lock().unwrap().insert(title.to_string(), queue);
            self
        }
    }

    #[async_trait]
    impl MarkupFetcher for ScriptedFetcher {
        async fn fetch(&self, title: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(title)
                .and_then(|q| q.pop_front());
            match next {
                Some(Ok(body)) => Ok(body),
                Some(Err(status)) => Err(FetchError::Status {
                    title: title.to_string(),
                    status,
                }),
                None => Ok(format!("'''{}''' markup", title)),
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    const FAILURE: &str = "<!DOCTYPE html><html><body>Wikimedia Error</body></html>";

    #[tokio::test]
    async fn two_failure_pages_then_markup() {
        let fetcher = ScriptedFetcher::default().script("A", vec![Ok(FAILURE), Ok(FAILURE), Ok("{{Infobox}}")]);
        let worker = DownloadWorker::new(fetcher, policy(10));

        match worker.process(FetchJob::new("Q1", "A")).await {
            JobOutcome::Downloaded(page) => {
                assert_eq!(page.attempts, 3);
                assert_eq!(page.wikitext, "{{Infobox}}");
                assert_eq!(page.title, "A");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_cycle_terminates() {
        let fetcher = ScriptedFetcher::default()
            .script("A", vec![Ok("#REDIRECT [[B]]")])
            .script("B", vec![Ok("#redirect [[A]]")]);
        let worker = DownloadWorker::new(fetcher, policy(10));

        let outcome = worker.process(FetchJob::new("Q1", "A")).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(FailedJob { reason: FailureReason::RedirectCycle(ref t), attempts: 2, .. }) if t == "A"
        ));
        assert_eq!(worker.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn redirect_is_followed_to_new_title() {
        let fetcher = ScriptedFetcher::default().script("Waterloo", vec![Ok("#REDIRECT [[Battle of Waterloo|x]]\n{{R from move}}")]);
        let worker = DownloadWorker::new(fetcher, policy(10));

        match worker.process(FetchJob::new("Q48314", "Waterloo")).await {
            JobOutcome::Downloaded(page) => {
                assert_eq!(page.requested, "Waterloo");
                assert_eq!(page.title, "Battle of Waterloo");
                assert_eq!(page.attempts, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let fetcher = ScriptedFetcher::default().script("A", vec![Ok(FAILURE); 5]);
        let worker = DownloadWorker::new(fetcher, policy(3));

        let outcome = worker.process(FetchJob::new("Q1", "A")).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(FailedJob { reason: FailureReason::Exhausted, attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn status_errors_split_on_transience() {
        let fetcher = ScriptedFetcher::default()
            .script("busy", vec![Err(503), Err(429), Ok("text")])
            .script("gone", vec![Err(403)]);
        let worker = DownloadWorker::new(fetcher, policy(10));

        assert!(matches!(
            worker.process(FetchJob::new("Q1", "busy")).await,
            JobOutcome::Downloaded(DownloadedPage { attempts: 3, .. })
        ));
        assert!(matches!(
            worker.process(FetchJob::new("Q2", "gone")).await,
            JobOutcome::Failed(FailedJob { reason: FailureReason::Rejected(_), attempts: 1, .. })
        ));
    }

    #[test]
    fn job_lifecycle() {
        use JobState::*;
        assert!(Pending.can_become(Fetching));
        assert!(Fetching.can_become(Redirected));
        assert!(Redirected.can_become(Fetching));
        assert!(Retrying.can_become(FailedPermanently));
        assert!(!Pending.can_become(Succeeded));
        assert!(!Succeeded.can_become(Fetching));
        assert!(!FailedPermanently.can_become(Retrying));
        assert!(!Retrying.can_become(Succeeded));
    }

    #[tokio::test]
    async fn redirects_do_not_back_off() {
        let fetcher = ScriptedFetcher::default()
            .script("A", vec![Ok("#REDIRECT [[B]]")])
            .script("B", vec![Ok("#REDIRECT [[C]]")]);
        let slow = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        };
        let worker = DownloadWorker::new(fetcher, slow);

        let outcome = tokio::time::timeout(Duration::from_secs(5), worker.process(FetchJob::new("Q1", "A")))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Downloaded(DownloadedPage { attempts: 3, ref title, .. }) if title == "C"
        ));
    }

    #[tokio::test]
    async fn redirect_on_last_attempt_is_exhausted() {
        let fetcher = ScriptedFetcher::default().script("A", vec![Ok("#REDIRECT [[B]]")]);
        let worker = DownloadWorker::new(fetcher, policy(1));

        assert!(matches!(
            worker.process(FetchJob::new("Q1", "A")).await,
            JobOutcome::Failed(FailedJob { reason: FailureReason::Exhausted, attempts: 1, ref title, .. }) if title == "B"
        ));
    }

    #[test]
    fn classification() {
        assert_eq!(classify("  <!doctype html>".into()), Response::FailurePage);
        assert_eq!(
            classify("#REDIRECT [[Siege of Acre (1189–1191)]]".into()),
            Response::Redirect("Siege of Acre (1189–1191)".into())
        );
        assert_eq!(classify("#REDIRECT nowhere".into()), Response::Markup("#REDIRECT nowhere".into()));
        assert!(matches!(classify("{{Infobox}}".into()), Response::Markup(_)));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(p.delay(1), Duration::from_millis(500));
        assert_eq!(p.delay(2), Duration::from_secs(1));
        assert_eq!(p.delay(3), Duration::from_secs(2));
        assert_eq!(p.delay(4), Duration::from_secs(3));
        assert_eq!(p.delay(40), Duration::from_secs(3));
    }

    /// Holds every fetch until the test adds permits to `gate`.
    struct GatedFetcher {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl MarkupFetcher for GatedFetcher {
        async fn fetch(&self, title: &str) -> Result<String, FetchError> {
            let _open = self.gate.acquire().await.unwrap();
            Ok(format!("'''{}''' markup", title))
        }
    }

    #[tokio::test]
    async fn full_queue_holds_back_the_producer() {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = GatedFetcher { gate: Arc::clone(&gate) };
        let worker = Arc::new(DownloadWorker::new(fetcher, policy(1)));
        let (job_tx, job_rx) = mpsc::channel(1);
        let (result_tx, mut result_rx) = mpsc::channel(8);
        let sent = Arc::new(AtomicUsize::new(0));

        let pool = tokio::spawn(run_workers(worker, job_rx, 1, result_tx));
        let producer = {
            let sent = Arc::clone(&sent);
            tokio::spawn(async move {
                for i in 0..5 {
                    job_tx.send(FetchJob::new(format!("Q{i}"), format!("T{i}"))).await.unwrap();
                    sent.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        // One job fetching, one waiting for a pool slot, one in the queue.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!producer.is_finished());
        assert_eq!(sent.load(Ordering::SeqCst), 3);

        gate.add_permits(1);
        let mut downloaded = 0;
        while let Some(outcome) = result_rx.recv().await {
            assert!(matches!(outcome, JobOutcome::Downloaded(_)));
            downloaded += 1;
        }
        producer.await.unwrap();
        pool.await.unwrap();
        assert_eq!(downloaded, 5);
        assert_eq!(sent.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn pool_drains_queue_after_producer_finishes() {
        let fetcher = ScriptedFetcher::default().script("T3", vec![Ok(FAILURE), Ok("ok")]);
        let worker = Arc::new(DownloadWorker::new(fetcher, policy(5)));
        let (job_tx, job_rx) = mpsc::channel(2);
        let (result_tx, mut result_rx) = mpsc::channel(4);

        let pool = tokio::spawn(run_workers(worker, job_rx, 2, result_tx));
        let producer = tokio::spawn(async move {
            for i in 0..6 {
                job_tx.send(FetchJob::new(format!("Q{i}"), format!("T{i}"))).await.unwrap();
            }
        });

        let mut ids = Vec::new();
        while let Some(outcome) = result_rx.recv().await {
            match outcome {
                JobOutcome::Downloaded(page) => ids.push(page.id),
                JobOutcome::Failed(f) => panic!("unexpected failure {f:?}"),
            }
        }
        producer.await.unwrap();
        pool.await.unwrap();

        ids.sort();
        assert_eq!(ids, vec!["Q0", "Q1", "Q2", "Q3", "Q4", "Q5"]);
    }
}
