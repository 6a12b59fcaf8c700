pub mod clients;
pub mod config;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod frame;
pub mod http;
pub mod monitor;
pub mod prompts;
pub mod verdict;

pub use clients::{AnalysisClient, GeminiVisionClient, ServiceError, ServiceErrorKind};
pub use config::Config;
pub use error::{PostureError, Result};
pub use extract::{ExtractedVerdict, ExtractionError, extract_verdict};
pub use feedback::{ChannelSink, FeedbackPresenter, FeedbackSink};
pub use frame::{FileFrameSource, Frame, FrameSource, StaticFrameSource};
pub use monitor::{CheckOutcome, Monitor, MonitorStatus};
pub use verdict::{Posture, Verdict};
