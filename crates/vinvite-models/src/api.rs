//! Server request/response types.
//!
//! Every JSON endpoint wraps its payload in `{success, error?}`; the
//! payload fields are flattened next to the envelope.

use serde::{Deserialize, Serialize};

use crate::data_url::ImageDataUrl;

/// Common `{success, error?}` envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiEnvelope {
    /// Error message, or a generic fallback.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "Request failed".to_string())
    }
}

/// Character descriptions produced by `/api/extract`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterDescriptions {
    #[serde(default)]
    pub bride: String,
    #[serde(default)]
    pub groom: String,
}

/// `/api/extract` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResponse {
    #[serde(flatten)]
    pub envelope: ApiEnvelope,
    #[serde(default)]
    pub descriptions: Option<CharacterDescriptions>,
}

/// Image quality evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    pub passed: bool,
}

impl EvaluationResult {
    /// Score used while evaluation is a pass-through.
    pub fn pass_through() -> Self {
        Self {
            score: 1.0,
            passed: true,
        }
    }
}

/// `/api/generate` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub envelope: ApiEnvelope,
    #[serde(default)]
    pub character_image: Option<ImageDataUrl>,
    #[serde(default)]
    pub evaluation: Option<EvaluationResult>,
}

/// `/api/remove-background` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveBackgroundResponse {
    #[serde(flatten)]
    pub envelope: ApiEnvelope,
    #[serde(default, rename = "imageDataURL")]
    pub image_data_url: Option<ImageDataUrl>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_response_shape() {
        let json = r#"{
            "success": true,
            "characterImage": "data:image/png;base64,AAAA",
            "evaluation": {"score": 0.9, "passed": true}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.envelope.success);
        assert_eq!(parsed.character_image.unwrap().mime(), "image/png");
        assert_eq!(parsed.evaluation.unwrap().score, 0.9);
    }

    #[test]
    fn test_error_envelope() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"success": false, "error": "bad photo"}"#).unwrap();
        assert!(!parsed.envelope.success);
        assert_eq!(parsed.envelope.error_message(), "bad photo");
        assert!(parsed.character_image.is_none());
    }

    #[test]
    fn test_remove_background_field_name() {
        let parsed: RemoveBackgroundResponse = serde_json::from_str(
            r#"{"success": true, "imageDataURL": "data:image/png;base64,AAAA"}"#,
        )
        .unwrap();
        assert!(parsed.image_data_url.is_some());
    }

    #[test]
    fn test_missing_error_message() {
        let envelope = ApiEnvelope {
            success: false,
            error: Some("  ".into()),
        };
        assert_eq!(envelope.error_message(), "Request failed");
    }
}
