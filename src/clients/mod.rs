pub mod gemini;
pub mod traits;

pub use gemini::GeminiVisionClient;
pub use traits::{AnalysisClient, ServiceError, ServiceErrorKind};
