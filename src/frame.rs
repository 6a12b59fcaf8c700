//! Captured stills and the sources that supply them.
//!
//! Camera acquisition itself lives outside this crate. A capture process
//! (ffmpeg, fswebcam, a browser tab, ...) keeps writing its latest still to
//! disk and [`FileFrameSource`] picks it up on demand.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use crate::error::{PostureError, Result};

const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is empty")]
    Empty,
    #[error("invalid image data format: expected a data:image/...;base64, prefix")]
    BadPrefix,
    #[error("unsupported image type '{0}'")]
    UnsupportedMime(String),
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("frame bytes are not a valid {0} image")]
    MagicMismatch(String),
}

/// An encoded still image. Owned by one check cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    mime_type: String,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Decode the `data:<mime>;base64,<payload>` form a browser canvas produces.
    pub fn from_data_url(data_url: &str) -> std::result::Result<Self, FrameError> {
        let rest = data_url.strip_prefix("data:").ok_or(FrameError::BadPrefix)?;
        let (mime_type, payload) = rest
            .split_once(";base64,")
            .ok_or(FrameError::BadPrefix)?;
        if !SUPPORTED_MIME_TYPES.contains(&mime_type) {
            return Err(FrameError::UnsupportedMime(mime_type.to_string()));
        }
        if payload.is_empty() {
            return Err(FrameError::Empty);
        }
        let bytes = BASE64
            .decode(payload.as_bytes())
            .map_err(|e| FrameError::Base64(e.to_string()))?;
        Ok(Self::new(bytes, mime_type))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Non-empty, a supported image type, and the leading bytes agree with it.
    pub fn validate(&self) -> std::result::Result<(), FrameError> {
        if self.bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        if !SUPPORTED_MIME_TYPES.contains(&self.mime_type.as_str()) {
            return Err(FrameError::UnsupportedMime(self.mime_type.clone()));
        }
        match sniff_mime(&self.bytes) {
            Some(sniffed) if sniffed == self.mime_type => Ok(()),
            _ => Err(FrameError::MagicMismatch(self.mime_type.clone())),
        }
    }
}

/// Identify an image by its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Supplies the most recent still on demand. `None` means "not ready yet";
/// callers retry on their next cycle. Must not block for long.
pub trait FrameSource: Send + Sync {
    fn capture_frame(&self) -> Option<Frame>;
}

/// Reads the latest still an external capture process wrote to disk.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    path: PathBuf,
    max_age: Option<Duration>,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>, max_age: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_stale(&self, modified: SystemTime) -> bool {
        match self.max_age {
            Some(max_age) => modified.elapsed().map(|age| age > max_age).unwrap_or(false),
            None => false,
        }
    }
}

impl FrameSource for FileFrameSource {
    fn capture_frame(&self) -> Option<Frame> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Frame {} not available: {}", self.path.display(), e);
                return None;
            }
        };
        if metadata.len() == 0 {
            tracing::debug!("Frame {} is empty", self.path.display());
            return None;
        }
        if let Ok(modified) = metadata.modified()
            && self.is_stale(modified)
        {
            tracing::warn!(
                "Frame {} is older than {:?}, capture looks stalled",
                self.path.display(),
                self.max_age
            );
            return None;
        }

        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Failed reading frame {}: {}", self.path.display(), e);
                return None;
            }
        };
        let mime = sniff_mime(&bytes).or_else(|| mime_for_path(&self.path))?;
        Some(Frame::new(bytes, mime))
    }
}

/// Always hands out the same frame, or nothing.
#[derive(Debug, Clone, Default)]
pub struct StaticFrameSource {
    frame: Option<Frame>,
}

impl StaticFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn empty() -> Self {
        Self { frame: None }
    }

    /// Load an image file once, up front.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| PostureError::Camera {
            message: format!("failed reading {}: {}", path.display(), e),
        })?;
        let mime = sniff_mime(&bytes)
            .or_else(|| mime_for_path(path))
            .ok_or_else(|| PostureError::Camera {
                message: format!("{} is not a jpeg, png or webp image", path.display()),
            })?;
        Ok(Self::new(Frame::new(bytes, mime)))
    }
}

impl FrameSource for StaticFrameSource {
    fn capture_frame(&self) -> Option<Frame> {
        self.frame.clone()
    }
}
