use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clients::traits::ServiceError;
use crate::extract::{ExtractedVerdict, ExtractionError};

pub const FRAME_UNAVAILABLE: &str = "frame unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Good,
    Bad,
    Error,
}

impl Posture {
    /// Case-insensitive; anything other than good/bad is an error display.
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("good") {
            Posture::Good
        } else if label.eq_ignore_ascii_case("bad") {
            Posture::Bad
        } else {
            Posture::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Posture::Good => "good",
            Posture::Bad => "bad",
            Posture::Error => "error",
        }
    }
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check cycle. `reason` only accompanies bad or error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub posture: Posture,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn good() -> Self {
        Self {
            posture: Posture::Good,
            reason: None,
        }
    }

    pub fn bad(reason: Option<String>) -> Self {
        Self {
            posture: Posture::Bad,
            reason,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            posture: Posture::Error,
            reason: Some(reason.into()),
        }
    }

    pub fn frame_unavailable() -> Self {
        Self::error(FRAME_UNAVAILABLE)
    }

    pub fn from_extracted(extracted: ExtractedVerdict) -> Self {
        match Posture::from_label(&extracted.posture) {
            Posture::Good => Self::good(),
            Posture::Bad => Self::bad(extracted.reason),
            Posture::Error => Self::error(extracted.reason.unwrap_or_else(|| {
                format!("unrecognized posture label '{}'", extracted.posture)
            })),
        }
    }

    pub fn is_error(&self) -> bool {
        self.posture == Posture::Error
    }
}

impl From<ServiceError> for Verdict {
    fn from(err: ServiceError) -> Self {
        Self::error(err.detail)
    }
}

impl From<ExtractionError> for Verdict {
    fn from(err: ExtractionError) -> Self {
        Self::error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(posture: &str, reason: Option<&str>) -> ExtractedVerdict {
        ExtractedVerdict {
            posture: posture.to_string(),
            reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn labels_are_case_insensitive() {
        assert_eq!(Posture::from_label("GOOD"), Posture::Good);
        assert_eq!(Posture::from_label("Bad"), Posture::Bad);
        assert_eq!(Posture::from_label("error"), Posture::Error);
        assert_eq!(Posture::from_label("meh"), Posture::Error);
        assert_eq!(Posture::from_label(" good"), Posture::Error);
    }

    #[test]
    fn good_verdicts_drop_reason() {
        let v = Verdict::from_extracted(extracted("Good", Some("nice")));
        assert_eq!(v, Verdict::good());
    }

    #[test]
    fn bad_verdicts_keep_reason() {
        let v = Verdict::from_extracted(extracted("BAD", Some("Slouching forward")));
        assert_eq!(v, Verdict::bad(Some("Slouching forward".to_string())));
    }

    #[test]
    fn unknown_labels_become_errors_with_a_reason() {
        let v = Verdict::from_extracted(extracted("unsure", None));
        assert!(v.is_error());
        assert_eq!(v.reason.as_deref(), Some("unrecognized posture label 'unsure'"));

        let v = Verdict::from_extracted(extracted("error", Some("no person visible")));
        assert_eq!(v, Verdict::error("no person visible"));
    }

    #[test]
    fn serializes_to_the_feedback_wire_shape() {
        let json = serde_json::to_value(Verdict::error("frame unavailable")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"posture": "error", "reason": "frame unavailable"})
        );
        let json = serde_json::to_value(Verdict::good()).unwrap();
        assert_eq!(json, serde_json::json!({"posture": "good"}));
    }
}
