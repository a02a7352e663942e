//! LLM text-generation adapter used by the query enhancer's fallback paths.
//!
//! The language model itself is an opaque external service; this module
//! models the generation contract plus bracketed-JSON extraction helpers
//! for parsing its free-text responses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contract for a text-generation backend.
///
/// Implementations must be thread-safe: the query enhancer may be shared
/// across concurrently executing retrieval requests.
pub trait LlmClient: Send + Sync {
    /// Generates a completion for `prompt`, optionally steered by `system`.
    ///
    /// # Errors
    ///
    /// Returns an error string on any transport or backend failure. Callers
    /// in this crate always treat failure as "fall back to a heuristic",
    /// never as fatal.
    fn generate(&self, prompt: &str, system: Option<&str>) -> std::result::Result<String, String>;
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Calls a remote generation service's `/api/generate` endpoint.
pub struct HttpLlmClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model_name: String,
}

impl HttpLlmClient {
    /// Creates a new HTTP-backed LLM client.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model_name: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            model_name: model_name.into(),
        }
    }
}

impl LlmClient for HttpLlmClient {
    fn generate(&self, prompt: &str, system: Option<&str>) -> std::result::Result<String, String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let request = GenerateRequest {
            model: &self.model_name,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: 0.3 },
            system,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("generation service returned status {}", response.status()));
        }

        let parsed: GenerateResponse = response.json().map_err(|e| e.to_string())?;
        Ok(parsed.response.trim().to_string())
    }
}

/// A test double that always fails, used to exercise the query enhancer's
/// heuristic fallback paths deterministically.
pub struct NullLlmClient;

impl LlmClient for NullLlmClient {
    fn generate(&self, _prompt: &str, _system: Option<&str>) -> std::result::Result<String, String> {
        Err("no language model configured".to_string())
    }
}

/// Extracts the first balanced `{...}` substring from `text`, the way the
/// original service's hand-rolled JSON extraction worked: find the first
/// `{` and the last `}`, and hand everything between to the JSON parser.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Extracts the first balanced `[...]` substring from `text`, mirroring
/// [`extract_json_object`] for array-shaped responses.
#[must_use]
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end >= start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_client_always_errors() {
        let client = NullLlmClient;
        assert!(client.generate("hello", None).is_err());
    }

    #[test]
    fn extract_json_object_strips_surrounding_prose() {
        let text = "Sure, here you go: {\"a\": 1} — hope that helps";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_json_object_missing_braces_is_none() {
        assert_eq!(extract_json_object("no braces here"), None);
    }

    #[test]
    fn extract_json_array_strips_surrounding_prose() {
        let text = "Variations: [\"a\", \"b\"] done.";
        assert_eq!(extract_json_array(text), Some("[\"a\", \"b\"]"));
    }

    #[test]
    fn extract_json_array_missing_brackets_is_none() {
        assert_eq!(extract_json_array("nothing to see"), None);
    }
}
