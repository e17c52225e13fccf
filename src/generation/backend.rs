use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::common::errors::GenerationError;
use crate::common::http::HttpClient;
use crate::common::types::AnyResult;
use crate::configs::GenerationConfig;

/// Lazy sequence of text fragments from one generation.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Bound on the time to a streaming response (headers, not the full body).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per request before the failure is surfaced.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff between attempts scales linearly with the attempt number.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Persona and length guidance prepended to every prompt.
const SYSTEM_PREAMBLE: &str = "You are a helpful Discord bot assistant. \
Keep all responses under 2000 characters to fit Discord message limits. \
Be concise but helpful.";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One newline-delimited fragment of the response body.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Parse one wire line. The stream tolerates noise: anything that is not a
/// fragment object is skipped.
fn parse_line(line: &str) -> Option<GenerateChunk> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// The generation service boundary the pipeline talks to.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn model(&self) -> &str;

    /// Start one streaming generation. Fragments arrive lazily; the call
    /// resolves once the response starts streaming.
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;
}

/// HTTP client for an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &GenerationConfig) -> AnyResult<Self> {
        Ok(Self {
            http: HttpClient::new_streaming()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    async fn attempt(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let send = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send();

        let response = tokio::time::timeout(REQUEST_TIMEOUT, send)
            .await
            .map_err(|_| GenerationError::Timeout(REQUEST_TIMEOUT))??;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::BackendStatus {
                status: status.as_u16(),
            });
        }

        // Frame the byte stream into lines and forward parsed fragments.
        let bytes = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(Box::pin(bytes));
        let mut lines = FramedRead::new(reader, LinesCodec::new());

        let (tx, rx) = flume::unbounded::<String>();
        tokio::spawn(async move {
            while let Some(result) = lines.next().await {
                let line = match result {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Generation stream ended early: {}", e);
                        break;
                    }
                };
                let Some(chunk) = parse_line(&line) else {
                    continue;
                };
                if !chunk.response.is_empty() && tx.send(chunk.response).is_err() {
                    break;
                }
                if chunk.done {
                    break;
                }
            }
        });

        Ok(Box::pin(rx.into_stream()))
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let full_prompt = format!("{}\n\n{}", SYSTEM_PREAMBLE, prompt);

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Generation attempt {}/{}", attempt, MAX_ATTEMPTS);
            match self.attempt(&full_prompt).await {
                Ok(stream) => return Ok(stream),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= MAX_ATTEMPTS => {
                    return Err(GenerationError::Exhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "Generation request failed, retrying ({}/{}): {}",
                        attempt, MAX_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
            }
        }
    }
}
