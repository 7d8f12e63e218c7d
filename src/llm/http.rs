//! Shared HTTP plumbing for the hosted-model backends

use std::time::Duration;

use log::debug;
use reqwest::Client;
use serde_json::Value;

use super::error::LlmError;

/// Error-body fragments that identify a rejection of the tool-calling protocol
const TOOLS_UNSUPPORTED_MARKERS: &[&str] = &[
    "tool_choice",
    "tools is not supported",
    "tools are not supported",
    "does not support tools",
    "does not support tool",
    "tool use is not supported",
    "function calling",
    "function_call",
    "tool calling",
];

/// JSON-over-HTTPS poster bound to one endpoint and one credential
#[derive(Clone)]
pub struct HttpEndpoint {
    client: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build URL from endpoint and path
    pub fn build_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// POST a JSON body with bearer auth and return the decoded JSON body
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, LlmError> {
        let url = self.build_url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_failure(status.as_u16(), error_body));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(format!("body is not JSON: {}", e)))
    }
}

/// Map a non-success status to an error.
///
/// Client errors whose body names the tool-calling protocol become
/// [`LlmError::ToolsUnsupported`]; that is the only signal that triggers the
/// agent loop's fallback.
pub fn classify_failure(status: u16, body: String) -> LlmError {
    if matches!(status, 400 | 404 | 422) {
        let lower = body.to_lowercase();
        if TOOLS_UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
            return LlmError::ToolsUnsupported(body);
        }
    }
    LlmError::ApiError { status, message: body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_joins_slashes() {
        let endpoint = HttpEndpoint::new("https://api.example.com/", "k", Duration::from_secs(5)).unwrap();
        assert_eq!(
            endpoint.build_url("/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_classify_tools_unsupported() {
        let err = classify_failure(
            400,
            r#"{"error":{"message":"This model does not support tools"}}"#.to_string(),
        );
        assert!(err.is_tools_unsupported());

        let err = classify_failure(422, "tool_choice is not allowed for this model".to_string());
        assert!(err.is_tools_unsupported());
    }

    #[test]
    fn test_classify_other_failures() {
        let err = classify_failure(400, "max_tokens too large".to_string());
        assert!(matches!(err, LlmError::ApiError { status: 400, .. }));

        // server errors mentioning tools are still transient
        let err = classify_failure(500, "tool calling backend crashed".to_string());
        assert!(matches!(err, LlmError::ApiError { status: 500, .. }));
    }

    #[test]
    fn test_debug_hides_key() {
        let endpoint = HttpEndpoint::new("https://api.example.com", "secret-key", Duration::from_secs(5)).unwrap();
        let debug = format!("{:?}", endpoint);
        assert!(debug.contains("api.example.com"));
        assert!(!debug.contains("secret-key"));
    }
}
