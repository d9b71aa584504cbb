//! Metered embedding API client (OpenAI-compatible `/embeddings`).
//!
//! This type knows nothing about retries or breakers; wrap it in
//! [`ResilientProvider`](crate::resilience::ResilientProvider) before use.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use crate::config::RemoteProviderConfig;
use crate::{
    estimate_tokens, validate_texts, EmbeddingError, EmbeddingProvider, EmbeddingResult,
    ProviderHealth, ProviderInfo, ProviderKind,
};

pub struct RemoteProvider {
    config: RemoteProviderConfig,
    info: ProviderInfo,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// Vectors plus whatever usage the API reported.
#[derive(Debug, PartialEq)]
pub(crate) struct ParsedEmbeddings {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: Option<u64>,
}

impl RemoteProvider {
    pub fn new(config: RemoteProviderConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig(format!("HTTP client: {e}")))?;

        let info = ProviderInfo {
            name: config.name.clone(),
            model: config.model_name.clone(),
            dimension: config.dimension,
            max_tokens: config.max_tokens,
            cost_per_1k_tokens: config.cost_per_1k_tokens,
            max_batch_size: config.max_batch_size,
            rate_limit_rpm: Some(config.rate_limit.requests_per_minute),
        };

        Ok(Self {
            api_key: config.resolved_api_key(),
            config,
            info,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.base_url.trim_end_matches('/'))
    }

    fn api_key(&self) -> Result<&str, EmbeddingError> {
        self.api_key.as_deref().ok_or_else(|| {
            EmbeddingError::ProviderUnavailable(format!(
                "no API key for '{}' (set remote.api_key or {})",
                self.config.name,
                RemoteProviderConfig::API_KEY_ENV
            ))
        })
    }

    fn build_payload(&self, texts: &[String]) -> Value {
        let mut payload = json!({ "input": texts, "model": self.config.model_name });
        if self.config.send_dimensions {
            payload["dimensions"] = json!(self.config.dimension);
        }
        payload
    }

    async fn send_request(&self, key: &str, payload: &Value) -> Result<Value, EmbeddingError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(key)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(format!("invalid JSON body: {e}")))
    }

    fn classify_transport_error(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_timeout() {
            EmbeddingError::Timeout(self.config.timeout)
        } else if err.is_decode() {
            EmbeddingError::MalformedResponse(err.to_string())
        } else {
            EmbeddingError::Transient(format!("HTTP request failed: {err}"))
        }
    }

    async fn generate_chunk(
        &self,
        key: &str,
        texts: &[String],
    ) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        let started = Instant::now();
        let payload = self.build_payload(texts);
        let parsed = parse_embeddings(self.send_request(key, &payload).await?)?;

        if parsed.vectors.len() != texts.len() {
            return Err(EmbeddingError::MalformedResponse(format!(
                "API returned {} embeddings for {} inputs",
                parsed.vectors.len(),
                texts.len()
            )));
        }
        if let Some(bad) = parsed
            .vectors
            .iter()
            .find(|v| v.len() != self.config.dimension)
        {
            return Err(EmbeddingError::MalformedResponse(format!(
                "expected dimension {}, got {}",
                self.config.dimension,
                bad.len()
            )));
        }

        let latency = started.elapsed();
        let estimates: Vec<u32> = texts.iter().map(|t| estimate_tokens(t)).collect();
        let estimated_total: u64 = estimates.iter().map(|&t| t as u64).sum();
        let total_tokens = parsed.total_tokens.unwrap_or(estimated_total);
        let total_cost = self.info.cost_for_tokens(total_tokens);

        Ok(parsed
            .vectors
            .into_iter()
            .zip(estimates)
            .map(|(vector, estimate)| {
                let share = estimate as f64 / estimated_total.max(1) as f64;
                EmbeddingResult {
                    dimension: vector.len(),
                    vector,
                    provider: ProviderKind::Remote,
                    model: self.config.model_name.clone(),
                    latency,
                    tokens: Some(((total_tokens as f64 * share).round() as u32).max(1)),
                    cost: Some(total_cost * share),
                    cache_hit: false,
                }
            })
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        if !self.config.enabled {
            return Err(EmbeddingError::ProviderUnavailable(
                "remote provider disabled".into(),
            ));
        }
        self.api_key().map(|_| ())
    }

    async fn generate(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        validate_texts(texts)?;
        let key = self.api_key()?;

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.max_batch_size) {
            results.extend(self.generate_chunk(key, chunk).await?);
        }
        tracing::debug!(
            provider = %self.config.name,
            texts = texts.len(),
            "remote embeddings generated"
        );
        Ok(results)
    }

    async fn health_check(&self) -> ProviderHealth {
        if let Err(e) = self.api_key() {
            return ProviderHealth::unhealthy(ProviderKind::Remote, e.to_string());
        }
        let started = Instant::now();
        match self.generate(&["health".to_string()]).await {
            Ok(_) => ProviderHealth::healthy(ProviderKind::Remote, started.elapsed()),
            Err(e) => ProviderHealth::unhealthy(ProviderKind::Remote, e.to_string()),
        }
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

/// Accepts `{"data":[{"embedding":[..],"index":n}],"usage":{..}}`, `{"embeddings":[..]}`
/// or a bare array of vectors.
pub(crate) fn parse_embeddings(value: Value) -> Result<ParsedEmbeddings, EmbeddingError> {
    match value {
        Value::Object(mut map) => {
            let total_tokens = map
                .get("usage")
                .and_then(|u| u.get("total_tokens"))
                .and_then(Value::as_u64);

            if let Some(embeddings) = map.remove("embeddings") {
                return Ok(ParsedEmbeddings {
                    vectors: parse_embedding_collection(embeddings)?,
                    total_tokens,
                });
            }

            if let Some(Value::Array(items)) = map.remove("data") {
                let mut indexed = Vec::with_capacity(items.len());
                for (position, item) in items.into_iter().enumerate() {
                    let Value::Object(mut obj) = item else {
                        return Err(EmbeddingError::MalformedResponse(
                            "unexpected entry inside `data` array".into(),
                        ));
                    };
                    let index = obj
                        .get("index")
                        .and_then(Value::as_u64)
                        .map(|i| i as usize)
                        .unwrap_or(position);
                    let embedding = obj.remove("embedding").ok_or_else(|| {
                        EmbeddingError::MalformedResponse(
                            "missing `embedding` field in data item".into(),
                        )
                    })?;
                    indexed.push((index, parse_embedding_vector(embedding)?));
                }
                indexed.sort_by_key(|(index, _)| *index);
                return Ok(ParsedEmbeddings {
                    vectors: indexed.into_iter().map(|(_, v)| v).collect(),
                    total_tokens,
                });
            }

            Err(EmbeddingError::MalformedResponse(
                "unsupported API response shape".into(),
            ))
        }
        other => Ok(ParsedEmbeddings {
            vectors: parse_embedding_collection(other)?,
            total_tokens: None,
        }),
    }
}

fn parse_embedding_collection(value: Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match value {
        Value::Array(items) if items.iter().all(|item| matches!(item, Value::Array(_))) => {
            items.into_iter().map(parse_embedding_vector).collect()
        }
        Value::Array(items) => parse_embedding_vector(Value::Array(items)).map(|v| vec![v]),
        other => Err(EmbeddingError::MalformedResponse(format!(
            "embeddings must be an array, got {other}"
        ))),
    }
}

fn parse_embedding_vector(value: Value) -> Result<Vec<f32>, EmbeddingError> {
    match value {
        Value::Array(values) => values
            .into_iter()
            .map(|entry| match entry {
                Value::Number(num) => num.as_f64().map(|f| f as f32).ok_or_else(|| {
                    EmbeddingError::MalformedResponse("non-finite embedding value".into())
                }),
                other => Err(EmbeddingError::MalformedResponse(format!(
                    "embedding entries must be numbers, got {other}"
                ))),
            })
            .collect(),
        other => Err(EmbeddingError::MalformedResponse(format!(
            "embedding vector must be an array, got {other}"
        ))),
    }
}
