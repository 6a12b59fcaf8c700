//! Feedback delivery and presentation.
//!
//! The orchestrator only knows [`FeedbackSink`]. The binary wires a
//! [`ChannelSink`] to a [`FeedbackPresenter`] task, which shows each verdict
//! and dismisses it after a fixed duration unless a newer one arrives first.

use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::verdict::{Posture, Verdict};

/// Receives one verdict per check cycle. Must return promptly.
pub trait FeedbackSink: Send + Sync {
    fn deliver(&self, verdict: Verdict);
}

/// Forwards verdicts over an unbounded channel to whoever presents them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Verdict>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Verdict>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FeedbackSink for ChannelSink {
    fn deliver(&self, verdict: Verdict) {
        if self.tx.send(verdict).is_err() {
            tracing::debug!("Feedback receiver dropped; verdict discarded");
        }
    }
}

/// User-facing rendering of a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub posture: Posture,
    pub headline: String,
    pub instruction: String,
    /// Error banner; `None` clears any banner left by an earlier error.
    pub notice: Option<String>,
}

impl Feedback {
    pub fn from_verdict(verdict: &Verdict) -> Self {
        match verdict.posture {
            Posture::Good => Self {
                posture: Posture::Good,
                headline: "Posture: Good!".to_string(),
                instruction: "Keep up the great work!".to_string(),
                notice: None,
            },
            Posture::Bad => Self {
                posture: Posture::Bad,
                headline: match verdict.reason.as_deref() {
                    Some(reason) if !reason.is_empty() => {
                        format!("Posture: Needs Improvement ({})", reason)
                    }
                    _ => "Posture: Needs Improvement".to_string(),
                },
                instruction: "Take a deep breath in... and out. Sit up straight!".to_string(),
                notice: None,
            },
            Posture::Error => {
                let reason = verdict
                    .reason
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "Could not determine posture.".to_string());
                Self {
                    posture: Posture::Error,
                    headline: "Analysis Error".to_string(),
                    notice: Some(format!("Analysis Error: {}", reason)),
                    instruction: reason,
                }
            }
        }
    }
}

pub trait FeedbackRenderer: Send {
    /// Display `feedback`, replacing whatever is currently shown.
    fn show(&mut self, feedback: &Feedback);
    fn dismiss(&mut self);
}

/// Timestamped lines on a terminal.
pub struct ConsoleRenderer<W: Write + Send> {
    out: W,
}

impl ConsoleRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        if let Err(e) = writeln!(self.out, "[{}] {}", stamp, text) {
            tracing::warn!("Failed to write feedback: {}", e);
        }
    }
}

impl<W: Write + Send> FeedbackRenderer for ConsoleRenderer<W> {
    fn show(&mut self, feedback: &Feedback) {
        self.line(&format!("{} {}", feedback.headline, feedback.instruction));
        if let Some(notice) = &feedback.notice {
            self.line(notice);
        }
    }

    fn dismiss(&mut self) {
        self.line("Monitoring posture...");
    }
}

pub struct FeedbackPresenter<R: FeedbackRenderer> {
    renderer: R,
    display_for: Duration,
}

/// An unrepresentable deadline means "keep it up until superseded".
fn dismiss_at(display_for: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(display_for)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

impl<R: FeedbackRenderer> FeedbackPresenter<R> {
    pub fn new(renderer: R, display_for: Duration) -> Self {
        Self {
            renderer,
            display_for,
        }
    }

    /// Present verdicts until the channel closes; hands the renderer back.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Verdict>) -> R {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(verdict) => {
                        let feedback = Feedback::from_verdict(&verdict);
                        self.renderer.show(&feedback);
                        deadline = Some(dismiss_at(self.display_for));
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.renderer.dismiss();
                    deadline = None;
                }
            }
        }

        if deadline.is_some() {
            self.renderer.dismiss();
        }
        self.renderer
    }
}
