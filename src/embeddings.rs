use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{IndexError, Result};

/// Abstract batch embedding interface. Implementations must return vectors in
/// input order, all of the declared dimension, and classify failures into the
/// retryable/non-retryable taxonomy so callers can apply backoff correctly.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn model_id(&self) -> &str;
    fn provider_type(&self) -> &'static str;
    async fn health_check(&self) -> Result<()>;
    /// Hint for how many parallel workers this provider tolerates well.
    fn default_thread_count(&self) -> usize;
}

pub fn create_client(cfg: &ProviderConfig) -> Result<Box<dyn EmbeddingClient>> {
    match cfg.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaClient::new(cfg.base_url.clone(), cfg.model.clone()))),
        "bedrock" => Ok(Box::new(BedrockClient::new(
            cfg.model.clone(),
            cfg.dimensions,
            cfg.aws_region.clone(),
            cfg.aws_profile.clone(),
        ))),
        other => Err(IndexError::Permanent(format!("unknown embedding provider: {other}"))),
    }
}

/// Retries a fallible call with exponential backoff on retryable errors only.
pub async fn with_retry<F, Fut, T>(max_attempts: u32, base_delay: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = base_delay * 2u32.pow(attempt);
                tracing::warn!(attempt, error = %e, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// --- Ollama: local, single-request, batch-capable via /api/embed ---

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        OllamaClient { http: reqwest::Client::new(), base_url, model }
    }
}

#[async_trait]
impl EmbeddingClient for OllamaClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = OllamaEmbedRequest { model: &self.model, input: texts };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Transport { endpoint: url.clone(), source: e.into() })?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexError::RateLimited { retry_after_ms: None });
        }
        if !resp.status().is_success() {
            let status = resp.status();
            if status.is_server_error() {
                return Err(IndexError::Transport {
                    endpoint: url,
                    source: anyhow::anyhow!("ollama returned {status}"),
                });
            }
            return Err(IndexError::Permanent(format!("ollama returned {status}")));
        }

        let parsed: OllamaEmbedResponse = resp
            .json()
            .await
            .map_err(|e| IndexError::Transport { endpoint: url, source: e.into() })?;
        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        768
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider_type(&self) -> &'static str {
        "ollama"
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| IndexError::Transport { endpoint: url, source: e.into() })?;
        Ok(())
    }

    fn default_thread_count(&self) -> usize {
        2
    }
}

// --- Bedrock: remote, one invocation per text, no batching ---

pub struct BedrockClient {
    model: String,
    dims: usize,
    region: Option<String>,
    profile: Option<String>,
}

#[derive(Serialize)]
struct TitanEmbedRequest<'a> {
    #[serde(rename = "inputText")]
    input_text: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct TitanEmbedResponse {
    embedding: Vec<f32>,
}

impl BedrockClient {
    pub fn new(model: String, dims: usize, region: Option<String>, profile: Option<String>) -> Self {
        BedrockClient { model, dims, region, profile }
    }

    async fn build_client(&self) -> aws_sdk_bedrockruntime::Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(profile) = &self.profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;
        aws_sdk_bedrockruntime::Client::new(&config)
    }
}

#[async_trait]
impl EmbeddingClient for BedrockClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.build_client().await;
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = TitanEmbedRequest { input_text: text, dimensions: self.dims };
            let payload = serde_json::to_vec(&body)
                .map_err(|e| IndexError::Other(anyhow::anyhow!("serialize bedrock request: {e}")))?;

            let resp = client
                .invoke_model()
                .model_id(&self.model)
                .content_type("application/json")
                .body(payload.into())
                .send()
                .await
                .map_err(|e| IndexError::Transport {
                    endpoint: self.model.clone(),
                    source: anyhow::anyhow!("bedrock invoke failed: {e}"),
                })?;

            let bytes = resp.body.into_inner();
            let parsed: TitanEmbedResponse = serde_json::from_slice(&bytes)
                .map_err(|e| IndexError::Permanent(format!("bedrock response parse failed: {e}")))?;
            out.push(parsed.embedding);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn provider_type(&self) -> &'static str {
        "bedrock"
    }

    async fn health_check(&self) -> Result<()> {
        let _ = self.build_client().await;
        Ok(())
    }

    fn default_thread_count(&self) -> usize {
        // One request per text with real network latency; a handful of
        // concurrent calls keeps Bedrock throttling manageable.
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClient {
        fail_times: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl EmbeddingClient for FakeClient {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail_times.load(std::sync::atomic::Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(IndexError::RateLimited { retry_after_ms: None });
            }
            Ok(texts.iter().map(|_| vec![0.0f32; 4]).collect())
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn model_id(&self) -> &str {
            "fake"
        }
        fn provider_type(&self) -> &'static str {
            "fake"
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        fn default_thread_count(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn with_retry_recovers_from_rate_limit() {
        let client = FakeClient { fail_times: std::sync::atomic::AtomicU32::new(2) };
        let result = with_retry(5, Duration::from_millis(1), || client.embed_batch(&["a".to_string()])).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_max_attempts() {
        let client = FakeClient { fail_times: std::sync::atomic::AtomicU32::new(10) };
        let result = with_retry(3, Duration::from_millis(1), || client.embed_batch(&["a".to_string()])).await;
        assert!(result.is_err());
    }
}
