//! OpenAI-compatible embedding encoder.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Encoder;

/// Blocking encoder for any service exposing an OpenAI-style `/embeddings` route.
#[derive(Clone)]
pub struct OpenAiEncoder {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_attempts: usize,
    batch_size: usize,
}

impl OpenAiEncoder {
    /// Builds the HTTP client; `max_attempts` and `batch_size` are floored at 1.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_attempts: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        anyhow::ensure!(!api_key.is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embeddings HTTP client")?;
        Ok(Self {
            client,
            api_key,
            endpoint: embeddings_endpoint(&base_url),
            model,
            dimensions,
            max_attempts: max_attempts.max(1),
            batch_size: batch_size.max(1),
        })
    }

    /// Maximum inputs sent per HTTP request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn request_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions,
        };
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.send(&body, inputs.len()) {
                Outcome::Vectors(vectors) => return Ok(vectors),
                Outcome::Transient(err) if attempt < self.max_attempts => {
                    let delay = retry_backoff(attempt);
                    warn!(attempt, ?delay, error = %format!("{err:#}"), "embeddings request failed, retrying");
                    thread::sleep(delay);
                }
                Outcome::Transient(err) | Outcome::Fatal(err) => {
                    return Err(err.context(format!(
                        "embeddings request to {} failed after {attempt} attempt(s)",
                        self.endpoint
                    )));
                }
            }
        }
    }

    fn send(&self, body: &EmbeddingRequest<'_>, expected: usize) -> Outcome {
        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
        {
            Ok(response) => response,
            Err(err) => {
                let transient = is_transient(Failure::Transport(&err));
                return Outcome::from_error(err.into(), transient);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            let err = anyhow!("HTTP {status}: {}", detail.trim());
            return Outcome::from_error(err, is_transient(Failure::Status(status)));
        }
        match response
            .json::<EmbeddingResponse>()
            .context("malformed embeddings response")
            .and_then(|parsed| parsed.into_vectors(expected))
        {
            Ok(vectors) => Outcome::Vectors(vectors),
            Err(err) => Outcome::Fatal(err),
        }
    }
}

impl Encoder for OpenAiEncoder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn encode_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            vectors.extend(self.request_batch(chunk)?);
        }
        Ok(vectors)
    }
}

/// Result of a single HTTP attempt.
enum Outcome {
    Vectors(Vec<Vec<f32>>),
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Outcome {
    fn from_error(err: anyhow::Error, transient: bool) -> Self {
        if transient {
            Outcome::Transient(err)
        } else {
            Outcome::Fatal(err)
        }
    }
}

enum Failure<'a> {
    Status(StatusCode),
    Transport(&'a reqwest::Error),
}

/// Rate limiting, server-side errors, and connection trouble are worth another attempt.
fn is_transient(failure: Failure<'_>) -> bool {
    match failure {
        Failure::Status(status) => status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        Failure::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
    }
}

fn embeddings_endpoint(base_url: &str) -> String {
    format!("{}/embeddings", base_url.trim_end_matches('/'))
}

/// 500ms doubling per attempt, capped at 8s.
fn retry_backoff(attempt: usize) -> Duration {
    Duration::from_millis(250u64 << attempt.clamp(1, 5))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingResponse {
    /// Orders entries by their request index and checks one vector per input.
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        self.data.sort_by_key(|entry| entry.index);
        anyhow::ensure!(
            self.data.len() == expected,
            "OpenAI returned {} embeddings for {} inputs",
            self.data.len(),
            expected
        );
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_entries_are_reordered_by_index() {
        let raw = r#"{"data":[
            {"embedding":[2.0],"index":1},
            {"embedding":[1.0],"index":0}
        ]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).expect("parse");
        let vectors = parsed.into_vectors(2).expect("two vectors");
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn response_count_mismatch_is_rejected() {
        let raw = r#"{"data":[{"embedding":[1.0],"index":0}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).expect("parse");
        assert!(parsed.into_vectors(3).is_err());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(500));
        assert_eq!(retry_backoff(2), Duration::from_millis(1000));
        assert_eq!(retry_backoff(5), Duration::from_secs(8));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }

    #[test]
    fn only_rate_limits_and_server_errors_are_transient() {
        assert!(is_transient(Failure::Status(StatusCode::TOO_MANY_REQUESTS)));
        assert!(is_transient(Failure::Status(StatusCode::SERVICE_UNAVAILABLE)));
        assert!(!is_transient(Failure::Status(StatusCode::BAD_REQUEST)));
        assert!(!is_transient(Failure::Status(StatusCode::UNAUTHORIZED)));
    }

    #[test]
    fn rejects_blank_credentials() {
        let result = OpenAiEncoder::new(
            "  ".to_string(),
            "https://api.openai.com/v1".to_string(),
            "text-embedding-3-small".to_string(),
            None,
            Duration::from_secs(1),
            1,
            8,
        );
        assert!(result.is_err());
    }
}
