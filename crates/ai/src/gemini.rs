//! Gemini `generateContent` REST client.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::capability::{GenerateRequest, GenerationCapability};
use crate::error::CapabilityError;

/// Default public endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini generation client.
#[derive(Clone)]
pub struct GeminiClient {
    /// HTTP client
    client: Client,

    /// API base URL
    endpoint: String,

    /// Default model name
    model: String,

    /// API key sent as `x-goog-api-key`
    api_key: String,
}

impl GeminiClient {
    /// Create a new client.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: ClientBuilder::new()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }

    fn body(request: &GenerateRequest) -> serde_json::Value {
        let mut parts = vec![json!({ "text": request.contents })];
        for uri in &request.image_refs {
            parts.push(json!({
                "fileData": { "mimeType": image_mime_type(uri), "fileUri": uri }
            }));
        }

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }]
        });
        if let Some(schema) = &request.response_schema {
            body["generationConfig"] = json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            });
        }
        body
    }
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl GenerationCapability for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, CapabilityError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        debug!("generateContent on {} ({} chars)", model, request.contents.len());

        let response = self
            .client
            .post(self.url(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| CapabilityError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let data: Response = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;

        extract_text(data)
    }
}

fn classify_status(status: StatusCode, body: String) -> CapabilityError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        CapabilityError::ResourceExhausted(body)
    } else {
        CapabilityError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

fn extract_text(data: Response) -> Result<String, CapabilityError> {
    let text: String = data
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err(CapabilityError::EmptyResponse)
    } else {
        Ok(text)
    }
}

fn image_mime_type(uri: &str) -> &'static str {
    let lower = uri.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_includes_schema_and_images() {
        let request = GenerateRequest::new("hello")
            .with_schema(json!({ "type": "STRING" }))
            .with_image("gs://bucket/shot.JPG");
        let body = GeminiClient::body(&request);

        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["contents"][0]["parts"][1]["fileData"]["mimeType"], "image/jpeg");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_body_without_schema_has_no_generation_config() {
        let body = GeminiClient::body(&GenerateRequest::new("hello"));
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_REQUEST, "RESOURCE_EXHAUSTED".into()).is_retryable());
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            CapabilityError::Status { status: 500, body: "boom".into() }
        );
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let data: Response = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "a" }, { "text": "b" }] } }]
        }))
        .unwrap();
        assert_eq!(extract_text(data).unwrap(), "ab");
    }

    #[test]
    fn test_extract_text_empty() {
        let data: Response = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert_eq!(extract_text(data), Err(CapabilityError::EmptyResponse));
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let client = GeminiClient::new("http://localhost:8080/", "m", "k", Duration::from_secs(1));
        assert_eq!(client.url("m"), "http://localhost:8080/models/m:generateContent");
    }
}
