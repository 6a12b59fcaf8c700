//! Gemini `generateContent` client for single-frame posture classification.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::traits::{AnalysisClient, ServiceError};
use crate::config::{Config, InferenceConfig};
use crate::error::Result;
use crate::frame::Frame;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<RequestContent>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
pub struct RequestContent {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateContentResponse {
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Candidate {
    pub content: Option<ResponseContent>,
    pub finish_reason: Option<String>,
    pub safety_ratings: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponseContent {
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct GeminiVisionClient {
    http: Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    max_output_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for GeminiVisionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiVisionClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GeminiVisionClient {
    pub fn new(api_key: Option<String>, inference: &InferenceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(inference.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            api_base: inference.api_base.trim_end_matches('/').to_string(),
            model: inference.model.clone(),
            api_key,
            max_output_tokens: inference.max_output_tokens,
            temperature: inference.temperature,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.runtime.gemini_api_key.clone(), &config.inference)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// One user turn: the instruction text, then the inline image.
    pub fn build_request(&self, frame: &Frame, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: prompt.to_string(),
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: frame.mime_type().to_string(),
                            data: frame.base64(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
                temperature: self.temperature,
                stop_sequences: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl AnalysisClient for GeminiVisionClient {
    fn ready(&self) -> std::result::Result<(), ServiceError> {
        match self.api_key {
            Some(_) => Ok(()),
            None => Err(ServiceError::missing_credential()),
        }
    }

    async fn analyze(&self, frame: &Frame, prompt: &str) -> std::result::Result<String, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::missing_credential());
        };
        frame
            .validate()
            .map_err(|e| ServiceError::invalid_input(e.to_string()))?;

        let body = self.build_request(frame, prompt);
        tracing::debug!(
            "Sending generateContent request (model={}, mime={}, bytes={})",
            self.model,
            frame.mime_type(),
            frame.bytes().len()
        );

        let resp = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::transport(format!("API request timed out: {}", e))
                } else {
                    ServiceError::transport(format!("API request failed: {}", e))
                }
            })?;

        let status = resp.status();
        tracing::debug!("Received response status: {}", status);
        let body_text = resp
            .text()
            .await
            .map_err(|e| ServiceError::transport(format!("Failed to read response body: {}", e)))?;

        interpret_response(status.as_u16(), &body_text)
    }
}

/// Turn a raw HTTP status + body into the model's output text or a typed failure.
pub fn interpret_response(status: u16, body: &str) -> std::result::Result<String, ServiceError> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|env| env.error.message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP error {}", status));
        tracing::error!("Gemini API error response ({}): {}", status, body);
        return Err(ServiceError::transport(format!(
            "API request failed: {}",
            detail
        )));
    }

    let parsed: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::transport(format!("Unreadable API response: {}", e)))?;

    let first = parsed.candidates.first();
    let text = first
        .and_then(|c| c.content.as_ref())
        .and_then(|content| content.parts.iter().find_map(|p| p.text.clone()))
        .filter(|t| !t.is_empty());
    if let Some(text) = text {
        tracing::debug!("Model output text: {}", text);
        return Ok(text);
    }

    let block_reason = parsed
        .prompt_feedback
        .as_ref()
        .and_then(|fb| fb.block_reason.as_deref());
    let reason = if let Some(block) = block_reason {
        format!(
            "Request blocked, reason: {}. Check safety settings or prompt.",
            block
        )
    } else if let Some(candidate) = first
        && (candidate.finish_reason.as_deref() == Some("SAFETY")
            || candidate.safety_ratings.as_ref().is_some_and(|r| !r.is_empty()))
    {
        let ratings = candidate
            .safety_ratings
            .as_ref()
            .map(|r| Value::Array(r.clone()).to_string())
            .unwrap_or_else(|| "[]".to_string());
        format!(
            "Response content filtered due to safety ratings. Check safety settings. Ratings: {}",
            ratings
        )
    } else {
        "no text in response".to_string()
    };
    tracing::warn!("Gemini returned no usable text: {}", reason);
    Err(ServiceError::empty_or_blocked(format!(
        "Could not extract text from Gemini response ({}).",
        reason
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::traits::ServiceErrorKind;

    const JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

    fn client(api_key: Option<&str>) -> GeminiVisionClient {
        GeminiVisionClient::new(api_key.map(str::to_string), &InferenceConfig::default()).unwrap()
    }

    #[test]
    fn request_has_text_then_inline_image_and_tuning() {
        let frame = Frame::new(JPEG.to_vec(), "image/jpeg");
        let body = serde_json::to_value(client(Some("k")).build_request(&frame, "classify")).unwrap();

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "classify");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], frame.base64());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 150);
        assert_eq!(body["generationConfig"]["stopSequences"], serde_json::json!([]));
        let temp = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temp - 0.2).abs() < 1e-6);
    }

    #[test]
    fn endpoint_adds_models_prefix_once() {
        let c = client(None);
        assert_eq!(
            c.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        let prefixed = GeminiVisionClient::new(
            None,
            &InferenceConfig {
                model: "models/gemini-x".to_string(),
                api_base: "http://localhost:9/".to_string(),
                ..InferenceConfig::default()
            },
        )
        .unwrap();
        assert_eq!(prefixed.endpoint(), "http://localhost:9/models/gemini-x:generateContent");
    }

    #[test]
    fn debug_output_redacts_key() {
        let rendered = format!("{:?}", client(Some("super-secret")));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn missing_credential_fails_before_validation() {
        let err = client(None)
            .analyze(&Frame::new(Vec::new(), "image/jpeg"), "p")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::MissingCredential);
        assert!(err.detail.contains("credential"));
    }

    #[tokio::test]
    async fn malformed_frame_is_invalid_input() {
        let c = client(Some("k"));
        let empty = c.analyze(&Frame::new(Vec::new(), "image/jpeg"), "p").await;
        assert_eq!(empty.unwrap_err().kind, ServiceErrorKind::InvalidInput);

        let mislabeled = c.analyze(&Frame::new(JPEG.to_vec(), "image/png"), "p").await;
        assert_eq!(mislabeled.unwrap_err().kind, ServiceErrorKind::InvalidInput);
    }

    #[test]
    fn success_returns_first_text_verbatim() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"  {\"posture\":\"good\"} "},{"text":"ignored"}]}}]}"#;
        assert_eq!(interpret_response(200, body).unwrap(), "  {\"posture\":\"good\"} ");
    }

    #[test]
    fn http_error_surfaces_structured_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        let err = interpret_response(400, body).unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::TransportOrHttpError);
        assert_eq!(err.detail, "API request failed: API key not valid.");
    }

    #[test]
    fn http_error_without_envelope_uses_status() {
        let err = interpret_response(503, "<html>down</html>").unwrap_err();
        assert_eq!(err.detail, "API request failed: HTTP error 503");
    }

    #[test]
    fn block_filter_and_empty_are_distinguished() {
        let blocked = interpret_response(200, r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .unwrap_err();
        assert_eq!(blocked.kind, ServiceErrorKind::EmptyOrBlockedResponse);
        assert!(blocked.detail.contains("Request blocked, reason: SAFETY"));

        let filtered = interpret_response(
            200,
            r#"{"candidates":[{"finishReason":"SAFETY","safetyRatings":[{"category":"HARM_CATEGORY_DANGEROUS_CONTENT","probability":"HIGH"}]}]}"#,
        )
        .unwrap_err();
        assert_eq!(filtered.kind, ServiceErrorKind::EmptyOrBlockedResponse);
        assert!(filtered.detail.contains("filtered due to safety ratings"));
        assert!(filtered.detail.contains("HARM_CATEGORY_DANGEROUS_CONTENT"));

        let empty = interpret_response(200, r#"{"candidates":[{"content":{"parts":[]}}]}"#)
            .unwrap_err();
        assert_eq!(empty.kind, ServiceErrorKind::EmptyOrBlockedResponse);
        assert!(empty.detail.contains("no text in response"));
    }

    #[test]
    fn garbage_success_body_is_transport_error() {
        let err = interpret_response(200, "not json").unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::TransportOrHttpError);
    }
}
