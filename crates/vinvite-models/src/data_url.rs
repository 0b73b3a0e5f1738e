//! Base64 image data URLs.
//!
//! Artifacts travel between the pipeline, the cache and the server as
//! `data:<mime>;base64,<payload>` strings, matching what the server returns.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BASE64_MARKER: &str = ";base64,";

/// Errors produced when parsing or decoding a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataUrlError {
    #[error("missing data: prefix")]
    MissingPrefix,

    #[error("only base64 data URLs are supported")]
    NotBase64,

    #[error("empty payload")]
    EmptyPayload,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// An image encoded as a base64 data URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageDataUrl(String);

impl ImageDataUrl {
    /// Validate the shape of a data URL without decoding the payload.
    pub fn parse(s: impl Into<String>) -> Result<Self, DataUrlError> {
        let s = s.into();
        let rest = s.strip_prefix("data:").ok_or(DataUrlError::MissingPrefix)?;
        let marker = rest.find(BASE64_MARKER).ok_or(DataUrlError::NotBase64)?;
        if rest[marker + BASE64_MARKER.len()..].trim().is_empty() {
            return Err(DataUrlError::EmptyPayload);
        }
        Ok(Self(s))
    }

    /// Encode raw image bytes.
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{}{}{}", mime, BASE64_MARKER, STANDARD.encode(bytes)))
    }

    /// Encode PNG bytes.
    pub fn from_png(bytes: &[u8]) -> Self {
        Self::from_bytes("image/png", bytes)
    }

    /// MIME type declared in the header.
    pub fn mime(&self) -> &str {
        let rest = &self.0["data:".len()..];
        match rest.find(BASE64_MARKER) {
            Some(i) => &rest[..i],
            None => "",
        }
    }

    /// The base64 payload.
    pub fn payload(&self) -> &str {
        match self.0.find(BASE64_MARKER) {
            Some(i) => &self.0[i + BASE64_MARKER.len()..],
            None => "",
        }
    }

    /// Decode the payload to raw image bytes.
    pub fn decode(&self) -> Result<Vec<u8>, DataUrlError> {
        STANDARD
            .decode(self.payload().trim())
            .map_err(|e| DataUrlError::InvalidBase64(e.to_string()))
    }

    /// Length of the whole data URL in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for ImageDataUrl {
    type Error = DataUrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ImageDataUrl> for String {
    fn from(value: ImageDataUrl) -> Self {
        value.0
    }
}

impl std::fmt::Display for ImageDataUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payloads are megabytes long; never dump them into logs.
        write!(f, "data:{};base64,<{} bytes>", self.mime(), self.payload().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_and_read_parts() {
        let url = ImageDataUrl::from_png(&[1, 2, 3, 4]);
        assert_eq!(url.mime(), "image/png");
        assert_eq!(url.decode().unwrap(), vec![1, 2, 3, 4]);
        assert!(url.as_str().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert_eq!(ImageDataUrl::parse("hello"), Err(DataUrlError::MissingPrefix));
        assert_eq!(
            ImageDataUrl::parse("data:image/png,abc"),
            Err(DataUrlError::NotBase64)
        );
        assert_eq!(
            ImageDataUrl::parse("data:image/png;base64,"),
            Err(DataUrlError::EmptyPayload)
        );
    }

    #[test]
    fn test_serde_validates() {
        let ok: ImageDataUrl = serde_json::from_str("\"data:image/png;base64,AAAA\"").unwrap();
        assert_eq!(ok.payload(), "AAAA");

        let bad = serde_json::from_str::<ImageDataUrl>("\"not a url\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_display_hides_payload() {
        let url = ImageDataUrl::from_png(&[0u8; 64]);
        let shown = url.to_string();
        assert!(!shown.contains(url.payload()));
    }
}
