use std::collections::HashMap;
use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use clockabilly::{
    Clockable,
    UtcClock,
};
use kz_api::v1alpha1::{
    DriftPhase,
    DriftReport,
};
use kz_core::constants::*;
use kz_core::metrics::REPORT_DISPATCH_FAILURES;
use metrics::counter;
use mockall::automock;
use tokio::task::JoinHandle;
use tracing::*;
use url::Url;

// Stops the background cleanup sweeps when dropped into stop()
#[derive(Default)]
pub struct CleanupHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl CleanupHandle {
    pub fn merge(&mut self, other: CleanupHandle) {
        self.tasks.extend(other.tasks);
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

#[automock]
pub trait ReportSender: Send + Sync {
    // Never blocks the admission path; delivery happens on a spawned task.
    fn send_async(&self, report: DriftReport);

    // The next send_async for this id emits a Resolved report and clears the
    // dedup state for the episode.
    fn mark_resolved(&self, id: &str);

    fn is_enabled(&self) -> bool;

    fn start_cleanup(&self, interval: Duration) -> CleanupHandle;
}

#[derive(Debug, Default)]
struct DedupEntry {
    detected_enqueued: bool,
    detected_acked: bool,
    resolve_requested: bool,
    last_touched: i64,
}

struct SenderInner {
    client: reqwest::Client,
    endpoint: Url,
    entries: Mutex<HashMap<String, DedupEntry>>,
    clock: Box<dyn Clockable + Send + Sync>,
}

// One HTTP sink with its own at-most-once state: a Detected report goes out
// exactly once per fingerprint until the episode resolves or expires.
pub struct HttpSender {
    inner: Arc<SenderInner>,
}

impl HttpSender {
    pub fn new(endpoint: Url) -> HttpSender {
        HttpSender::with_clock(endpoint, Box::new(UtcClock::new()))
    }

    pub fn with_clock(endpoint: Url, clock: Box<dyn Clockable + Send + Sync>) -> HttpSender {
        HttpSender {
            inner: Arc::new(SenderInner {
                client: reqwest::Client::new(),
                endpoint,
                entries: Mutex::new(HashMap::new()),
                clock,
            }),
        }
    }
}

impl SenderInner {
    // The dedup decision; returns the report that should actually go on the
    // wire, possibly rewritten to the Resolved phase.  Purely in-memory so
    // the lock is never held anywhere near the HTTP call.
    fn prepare(&self, mut report: DriftReport) -> Option<DriftReport> {
        let id = report.id().to_string();
        let now = self.clock.now_ts();

        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(id.clone()).or_default();
        entry.last_touched = now;

        if entry.resolve_requested || report.phase() == DriftPhase::Resolved {
            let acked = entry.detected_acked;
            entries.remove(&id);
            if acked {
                report.spec.phase = DriftPhase::Resolved;
                return Some(report);
            }
            // the Detected never made it to the sink, so there is nothing to
            // resolve; the episode just disappears
            debug!("superseding unacknowledged report {id}");
            return None;
        }

        if entry.detected_enqueued {
            debug!("report {id} already sent, deduplicating");
            return None;
        }
        entry.detected_enqueued = true;
        Some(report)
    }

    async fn deliver(&self, report: DriftReport) {
        let id = report.id().to_string();
        let phase = report.phase();

        let mut backoff = Duration::from_secs(DISPATCH_BACKOFF_SECONDS);
        for attempt in 1..=DISPATCH_MAX_ATTEMPTS {
            match self.post(&report).await {
                Ok(()) => {
                    debug!("delivered {phase:?} report {id} to {}", self.endpoint);
                    if phase == DriftPhase::Detected {
                        self.mark_acked(&id);
                    }
                    return;
                },
                Err(err) => {
                    warn!("delivery attempt {attempt} for report {id} failed: {err}");
                    if attempt < DISPATCH_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                },
            }
        }

        counter!(REPORT_DISPATCH_FAILURES).increment(1);
        error!("giving up on report {id} after {DISPATCH_MAX_ATTEMPTS} attempts");
        if phase == DriftPhase::Detected {
            // let a future detection try again
            self.clear_enqueued(&id);
        }
    }

    async fn post(&self, report: &DriftReport) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn mark_acked(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.detected_acked = true;
        }
    }

    fn clear_enqueued(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.detected_enqueued = false;
        }
    }

    fn sweep(&self) {
        let now = self.clock.now_ts();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.last_touched < DEDUP_EXPIRY_SECONDS);
        let expired = before - entries.len();
        if expired > 0 {
            info!("expired {expired} stale drift-report entries");
        }
    }
}

impl ReportSender for HttpSender {
    fn send_async(&self, report: DriftReport) {
        let Some(outgoing) = self.inner.prepare(report) else {
            return;
        };
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.deliver(outgoing).await });
    }

    fn mark_resolved(&self, id: &str) {
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.resolve_requested = true;
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn start_cleanup(&self, interval: Duration) -> CleanupHandle {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                inner.sweep();
            }
        });
        CleanupHandle { tasks: vec![task] }
    }
}

// Fans out to any number of sinks, each with independent dedup state
#[derive(Default)]
pub struct MultiSender {
    senders: Vec<Arc<dyn ReportSender>>,
}

impl MultiSender {
    pub fn new(senders: Vec<Arc<dyn ReportSender>>) -> MultiSender {
        MultiSender { senders }
    }

    pub fn from_endpoints(endpoints: impl IntoIterator<Item = Url>) -> MultiSender {
        MultiSender {
            senders: endpoints
                .into_iter()
                .map(|e| Arc::new(HttpSender::new(e)) as Arc<dyn ReportSender>)
                .collect(),
        }
    }
}

impl ReportSender for MultiSender {
    fn send_async(&self, report: DriftReport) {
        for sender in &self.senders {
            sender.send_async(report.clone());
        }
    }

    fn mark_resolved(&self, id: &str) {
        for sender in &self.senders {
            sender.mark_resolved(id);
        }
    }

    fn is_enabled(&self) -> bool {
        !self.senders.is_empty()
    }

    fn start_cleanup(&self, interval: Duration) -> CleanupHandle {
        let mut handle = CleanupHandle::default();
        for sender in &self.senders {
            handle.merge(sender.start_cleanup(interval));
        }
        handle
    }
}

#[cfg(test)]
mod test {
    use assertables::*;
    use clockabilly::mock::MockUtcClock;
    use httpmock::prelude::*;
    use kz_api::v1alpha1::{
        DriftReportSpec,
        ObjectIdentity,
        RequestSummary,
    };
    use rstest::*;
    use serde_json::json;

    use super::*;
    use crate::report_fingerprint;

    fn detected_report() -> DriftReport {
        let parent = ObjectIdentity {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            namespace: Some("test".into()),
            name: "the-deployment".into(),
            generation: Some(5),
        };
        let child = ObjectIdentity {
            api_version: "apps/v1".into(),
            kind: "ReplicaSet".into(),
            namespace: Some("test".into()),
            name: "the-replicaset".into(),
            generation: Some(2),
        };
        DriftReport::new(DriftReportSpec {
            id: report_fingerprint(&parent, &child),
            phase: DriftPhase::Detected,
            parent,
            child,
            request: RequestSummary::default(),
            old_object: None,
            new_object: None,
        })
    }

    fn test_sender(url: &str) -> HttpSender {
        HttpSender::with_clock(url.parse().unwrap(), Box::new(MockUtcClock::new(1000)))
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_dedups_detected() {
        let sender = test_sender("http://localhost:9999/webhook");
        let report = detected_report();

        assert_some!(sender.inner.prepare(report.clone()));
        // until an ack or a resolve, the same fingerprint stays quiet
        assert_none!(sender.inner.prepare(report.clone()));
        assert_none!(sender.inner.prepare(report));
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_resolve_requires_ack() {
        let sender = test_sender("http://localhost:9999/webhook");
        let report = detected_report();
        let id = report.id().to_string();

        assert_some!(sender.inner.prepare(report.clone()));
        sender.mark_resolved(&id);

        // Detected was never acknowledged, so the resolve is silent...
        assert_none!(sender.inner.prepare(report.clone()));

        // ...and the episode state is gone, so a fresh Detected goes out
        let outgoing = sender.inner.prepare(report).unwrap();
        assert_eq!(outgoing.phase(), DriftPhase::Detected);
    }

    #[rstest]
    #[tokio::test]
    async fn test_prepare_resolve_after_ack() {
        let sender = test_sender("http://localhost:9999/webhook");
        let report = detected_report();
        let id = report.id().to_string();

        assert_some!(sender.inner.prepare(report.clone()));
        sender.inner.mark_acked(&id);
        sender.mark_resolved(&id);

        let outgoing = sender.inner.prepare(report.clone()).unwrap();
        assert_eq!(outgoing.phase(), DriftPhase::Resolved);

        // episode cleared; the next detection starts over
        let outgoing = sender.inner.prepare(report).unwrap();
        assert_eq!(outgoing.phase(), DriftPhase::Detected);
    }

    #[rstest]
    #[tokio::test]
    async fn test_deliver_posts_and_acks() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/webhook").json_body_includes(
                json!({"kind": "DriftReport", "spec": {"phase": "Detected"}}).to_string(),
            );
            then.status(200).json_body(json!({"acknowledged": true}));
        });

        let sender = test_sender(&server.url("/webhook"));
        let report = detected_report();
        let id = report.id().to_string();

        let outgoing = sender.inner.prepare(report).unwrap();
        sender.inner.deliver(outgoing).await;

        mock.assert();
        assert!(sender.inner.entries.lock().unwrap().get(&id).unwrap().detected_acked);
    }

    #[rstest]
    #[tokio::test]
    async fn test_deliver_failure_allows_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/webhook");
            then.status(503);
        });

        let sender = test_sender(&server.url("/webhook"));
        let report = detected_report();
        let id = report.id().to_string();

        let outgoing = sender.inner.prepare(report.clone()).unwrap();
        sender.inner.deliver(outgoing).await;

        assert_eq!(mock.hits(), DISPATCH_MAX_ATTEMPTS);

        // the failed episode is retryable by a later detection
        let entries = sender.inner.entries.lock().unwrap();
        assert!(!entries.get(&id).unwrap().detected_enqueued);
        drop(entries);
        assert_some!(sender.inner.prepare(report.clone()));
    }

    #[rstest]
    #[tokio::test]
    async fn test_sweep_expires_stale_entries() {
        let clock = MockUtcClock::new(1000);
        let sender = HttpSender::with_clock("http://localhost:9999/webhook".parse().unwrap(), Box::new(clock.clone()));
        let report = detected_report();

        assert_some!(sender.inner.prepare(report.clone()));
        sender.inner.sweep();
        assert_eq!(sender.inner.entries.lock().unwrap().len(), 1);

        clock.clone().advance(DEDUP_EXPIRY_SECONDS + 1);
        sender.inner.sweep();
        assert_eq!(sender.inner.entries.lock().unwrap().len(), 0);

        // after expiry the same detection reports again
        assert_some!(sender.inner.prepare(report.clone()));
    }

    #[rstest]
    fn test_multi_sender_enablement() {
        assert!(!MultiSender::default().is_enabled());

        let multi = MultiSender::from_endpoints(["http://localhost:9999/webhook".parse().unwrap()]);
        assert!(multi.is_enabled());
    }
}
