//! Monitoring orchestrator.
//!
//! Owns the periodic schedule and the single-flight guard, and runs the
//! capture -> analyze -> extract -> deliver pipeline. At most one analysis
//! call is ever outstanding: a tick or manual trigger that finds a check in
//! flight is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::traits::{AnalysisClient, ServiceError};
use crate::error::{PostureError, Result};
use crate::extract::extract_verdict;
use crate::feedback::FeedbackSink;
use crate::frame::{Frame, FrameError, FrameSource};
use crate::prompts::POSTURE_PROMPT;
use crate::verdict::{Posture, Verdict};

/// Observable progress of the monitor, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "posture", rename_all = "snake_case")]
pub enum MonitorStatus {
    Idle,
    Capturing,
    Analyzing,
    Complete(Posture),
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another check was in flight; nothing happened.
    Skipped,
    Completed(Verdict),
}

struct CheckCore {
    frames: Arc<dyn FrameSource>,
    analyzer: Arc<dyn AnalysisClient>,
    sink: Arc<dyn FeedbackSink>,
    prompt: String,
    check_timeout: Option<Duration>,
    busy: AtomicBool,
    status: watch::Sender<MonitorStatus>,
}

/// Holding one means this task owns the single in-flight slot. Dropping it
/// re-arms the monitor, on every exit path including cancellation.
struct BusyGuard {
    core: Arc<CheckCore>,
}

impl BusyGuard {
    fn try_acquire(core: &Arc<CheckCore>) -> Option<Self> {
        core.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { core: core.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.core.busy.store(false, Ordering::Release);
    }
}

struct Schedule {
    handle: JoinHandle<()>,
    interval: Duration,
}

pub struct MonitorBuilder {
    frames: Arc<dyn FrameSource>,
    analyzer: Arc<dyn AnalysisClient>,
    sink: Arc<dyn FeedbackSink>,
    prompt: String,
    check_timeout: Option<Duration>,
}

impl MonitorBuilder {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Bound every analysis call; a hung call otherwise holds the guard forever.
    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Monitor {
        let (status, _) = watch::channel(MonitorStatus::Idle);
        Monitor {
            core: Arc::new(CheckCore {
                frames: self.frames,
                analyzer: self.analyzer,
                sink: self.sink,
                prompt: self.prompt,
                check_timeout: self.check_timeout,
                busy: AtomicBool::new(false),
                status,
            }),
            schedule: Mutex::new(None),
        }
    }
}

pub struct Monitor {
    core: Arc<CheckCore>,
    schedule: Mutex<Option<Schedule>>,
}

impl Monitor {
    pub fn builder(
        frames: Arc<dyn FrameSource>,
        analyzer: Arc<dyn AnalysisClient>,
        sink: Arc<dyn FeedbackSink>,
    ) -> MonitorBuilder {
        MonitorBuilder {
            frames,
            analyzer,
            sink,
            prompt: POSTURE_PROMPT.to_string(),
            check_timeout: None,
        }
    }

    /// Check now, then every `interval` measured tick to tick. Replaces any
    /// existing schedule. Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(PostureError::Validation {
                message: "check interval must be a positive duration".to_string(),
            });
        }

        let mut schedule = self.lock_schedule();
        if let Some(previous) = schedule.take() {
            debug!("Replacing existing schedule ({:?})", previous.interval);
            previous.handle.abort();
        }

        let core = self.core.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match BusyGuard::try_acquire(&core) {
                    Some(guard) => {
                        tokio::spawn(run_check(guard, None));
                    }
                    None => debug!("Previous check still in flight; dropping tick"),
                }
            }
        });

        self.core.status.send_replace(MonitorStatus::Idle);
        *schedule = Some(Schedule { handle, interval });
        info!("Starting posture checks every {}s", interval.as_secs_f64());
        Ok(())
    }

    /// Cancel future ticks. An in-flight check still completes and delivers.
    pub fn stop(&self) {
        if let Some(schedule) = self.lock_schedule().take() {
            schedule.handle.abort();
            self.core.status.send_replace(MonitorStatus::Paused);
            info!("Posture checks stopped");
        }
    }

    /// Run one check now, unless one is already in flight. The check runs on
    /// its own task: dropping the returned future does not cancel it, and
    /// its verdict is still delivered to the sink.
    pub async fn run_one_check(&self) -> CheckOutcome {
        match BusyGuard::try_acquire(&self.core) {
            Some(guard) => spawn_check(guard, None).await,
            None => CheckOutcome::Skipped,
        }
    }

    /// Like [`Monitor::run_one_check`], but analyzes a caller-supplied
    /// `data:image/...;base64,` still instead of asking the frame source.
    pub async fn analyze_data_url(&self, data_url: &str) -> CheckOutcome {
        match BusyGuard::try_acquire(&self.core) {
            Some(guard) => spawn_check(guard, Some(Frame::from_data_url(data_url))).await,
            None => CheckOutcome::Skipped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_schedule().is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.core.busy.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.lock_schedule().as_ref().map(|s| s.interval)
    }

    pub fn status(&self) -> MonitorStatus {
        *self.core.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.core.status.subscribe()
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<Schedule>> {
        // A poisoned lock only means a panic elsewhere; the Option is still valid.
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(schedule) = self.lock_schedule().take() {
            schedule.handle.abort();
        }
    }
}

async fn spawn_check(guard: BusyGuard, input: Option<std::result::Result<Frame, FrameError>>) -> CheckOutcome {
    match tokio::spawn(run_check(guard, input)).await {
        Ok(verdict) => CheckOutcome::Completed(verdict),
        Err(e) => {
            error!("Check task failed: {}", e);
            CheckOutcome::Completed(Verdict::error(format!("check task failed: {}", e)))
        }
    }
}

async fn run_check(guard: BusyGuard, input: Option<std::result::Result<Frame, FrameError>>) -> Verdict {
    let core = &guard.core;
    let check_id = Uuid::new_v4();
    core.publish(MonitorStatus::Capturing);
    debug!(%check_id, "Checking posture");

    let frame = match input {
        Some(Ok(frame)) => Some(frame),
        Some(Err(e)) => {
            let verdict = Verdict::from(ServiceError::invalid_input(e.to_string()));
            return finish(core, check_id, verdict);
        }
        None => core.frames.capture_frame(),
    };

    let verdict = match frame {
        Some(frame) => core.analyze(check_id, &frame).await,
        None => {
            warn!(%check_id, "Frame source not ready");
            Verdict::frame_unavailable()
        }
    };

    finish(core, check_id, verdict)
    // guard drops here, after delivery
}

fn finish(core: &CheckCore, check_id: Uuid, verdict: Verdict) -> Verdict {
    if let Some(reason) = verdict.reason.as_deref()
        && verdict.is_error()
    {
        error!(%check_id, "Analysis error: {}", reason);
    } else {
        info!(%check_id, posture = %verdict.posture, "Posture analysis complete");
    }
    core.publish(MonitorStatus::Complete(verdict.posture));
    core.sink.deliver(verdict.clone());
    verdict
}

impl CheckCore {
    /// Progress updates never overwrite `Paused`; only `start` leaves it.
    fn publish(&self, next: MonitorStatus) {
        self.status.send_if_modified(|current| {
            if *current == MonitorStatus::Paused {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn analyze(&self, check_id: Uuid, frame: &Frame) -> Verdict {
        if let Err(e) = self.analyzer.ready() {
            return e.into();
        }

        self.publish(MonitorStatus::Analyzing);
        debug!(%check_id, mime = frame.mime_type(), "Analyzing posture");
        let call = self.analyzer.analyze(frame, &self.prompt);
        let result = match self.check_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::transport(
                    PostureError::Timeout {
                        operation: "analysis".to_string(),
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }
                    .to_string(),
                )),
            },
            None => call.await,
        };

        match result {
            Ok(raw) => match extract_verdict(&raw) {
                Ok(extracted) => Verdict::from_extracted(extracted),
                Err(e) => {
                    warn!(%check_id, "Failed to parse model output {:?}: {}", raw, e);
                    e.into()
                }
            },
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StaticFrameSource;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        output: std::result::Result<String, ServiceError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisClient for Scripted {
        async fn analyze(&self, _frame: &Frame, prompt: &str) -> std::result::Result<String, ServiceError> {
            assert_eq!(prompt, POSTURE_PROMPT);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.output.clone()
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Verdict>>);

    impl FeedbackSink for Collect {
        fn deliver(&self, verdict: Verdict) {
            self.0.lock().unwrap().push(verdict);
        }
    }

    fn jpeg() -> Frame {
        Frame::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg")
    }

    fn monitor(
        frames: StaticFrameSource,
        output: std::result::Result<String, ServiceError>,
    ) -> (Monitor, Arc<Scripted>, Arc<Collect>) {
        let analyzer = Arc::new(Scripted {
            output,
            calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(Collect::default());
        let monitor = Monitor::builder(Arc::new(frames), analyzer.clone(), sink.clone()).build();
        (monitor, analyzer, sink)
    }

    #[tokio::test]
    async fn successful_check_delivers_parsed_verdict() {
        let (monitor, analyzer, sink) = monitor(
            StaticFrameSource::new(jpeg()),
            Ok("```json\n{\"posture\":\"Bad\",\"reason\":\"hunching\"}\n```".to_string()),
        );

        let outcome = monitor.run_one_check().await;
        let expected = Verdict::bad(Some("hunching".to_string()));
        assert_eq!(outcome, CheckOutcome::Completed(expected.clone()));
        assert_eq!(*sink.0.lock().unwrap(), vec![expected]);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_busy());
        assert_eq!(monitor.status(), MonitorStatus::Complete(Posture::Bad));
    }

    #[tokio::test]
    async fn missing_frame_skips_the_network_call() {
        let (monitor, analyzer, sink) =
            monitor(StaticFrameSource::empty(), Ok("{\"posture\":\"good\"}".to_string()));

        let outcome = monitor.run_one_check().await;
        assert_eq!(outcome, CheckOutcome::Completed(Verdict::frame_unavailable()));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert!(!monitor.is_busy());
    }

    #[tokio::test]
    async fn extraction_failure_becomes_error_verdict() {
        let (monitor, _, _) = monitor(
            StaticFrameSource::new(jpeg()),
            Ok("I cannot determine this.".to_string()),
        );
        let CheckOutcome::Completed(verdict) = monitor.run_one_check().await else {
            panic!("check should run");
        };
        assert!(verdict.is_error());
        assert!(verdict.reason.unwrap().contains("no JSON object found"));
        assert!(!monitor.is_busy());
    }

    #[tokio::test]
    async fn service_failure_becomes_error_verdict() {
        let (monitor, _, _) = monitor(
            StaticFrameSource::new(jpeg()),
            Err(ServiceError::transport("API request failed: HTTP error 500")),
        );
        let outcome = monitor.run_one_check().await;
        assert_eq!(
            outcome,
            CheckOutcome::Completed(Verdict::error("API request failed: HTTP error 500"))
        );
        assert!(!monitor.is_busy());
    }

    #[tokio::test]
    async fn invalid_data_url_is_reported_and_releases_guard() {
        let (monitor, analyzer, sink) =
            monitor(StaticFrameSource::empty(), Ok("{\"posture\":\"good\"}".to_string()));

        let outcome = monitor.analyze_data_url("not-a-data-url").await;
        let CheckOutcome::Completed(verdict) = outcome else {
            panic!("check should run");
        };
        assert!(verdict.is_error());
        assert!(verdict.reason.unwrap().contains("invalid image data format"));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert!(!monitor.is_busy());

        let ok = monitor.analyze_data_url(&jpeg().to_data_url()).await;
        assert_eq!(ok, CheckOutcome::Completed(Verdict::good()));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (monitor, _, _) = monitor(StaticFrameSource::empty(), Ok(String::new()));
        assert!(matches!(
            monitor.start(Duration::ZERO),
            Err(PostureError::Validation { .. })
        ));
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (monitor, _, _) = monitor(StaticFrameSource::empty(), Ok(String::new()));
        monitor.stop();
        assert_eq!(monitor.status(), MonitorStatus::Idle);

        monitor.start(Duration::from_secs(30)).unwrap();
        assert!(monitor.is_running());
        assert_eq!(monitor.interval(), Some(Duration::from_secs(30)));
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(monitor.status(), MonitorStatus::Paused);
    }

    #[test]
    fn status_serializes_with_posture_payload() {
        let json = serde_json::to_value(MonitorStatus::Complete(Posture::Good)).unwrap();
        assert_eq!(json, serde_json::json!({"state": "complete", "posture": "good"}));
        let json = serde_json::to_value(MonitorStatus::Paused).unwrap();
        assert_eq!(json, serde_json::json!({"state": "paused"}));
    }
}
