#![allow(dead_code)]

use async_trait::async_trait;
use hybrid_embed::{
    EmbeddingError, EmbeddingProvider, EmbeddingResult, HybridConfig, ProviderHealth,
    ProviderInfo, ProviderKind,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// In-process provider with deterministic vectors and scriptable failures.
pub struct FakeProvider {
    kind: ProviderKind,
    info: ProviderInfo,
    fail_with: Mutex<Option<EmbeddingError>>,
    init_error: Option<EmbeddingError>,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl FakeProvider {
    pub fn local() -> Self {
        Self::new(ProviderKind::Local, "fake-minilm", 384, 0.0)
    }

    pub fn remote() -> Self {
        Self::new(ProviderKind::Remote, "fake-3-small", 1536, 0.02)
    }

    fn new(kind: ProviderKind, model: &str, dimension: usize, cost_per_1k_tokens: f64) -> Self {
        Self {
            kind,
            info: ProviderInfo {
                name: format!("fake-{}", kind.as_str()),
                model: model.to_string(),
                dimension,
                max_tokens: 8191,
                cost_per_1k_tokens,
                max_batch_size: 64,
                rate_limit_rpm: None,
            },
            fail_with: Mutex::new(None),
            init_error: None,
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    pub fn failing(self, err: EmbeddingError) -> Self {
        *self.fail_with.lock().unwrap() = Some(err);
        self
    }

    pub fn failing_init(mut self, err: EmbeddingError) -> Self {
        self.init_error = Some(err);
        self
    }

    pub fn recover(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

/// Unit-length vector derived from the text bytes.
pub fn fake_vector(text: &str, dimension: usize) -> Vec<f32> {
    let seed = text
        .bytes()
        .fold(17u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    let raw: Vec<f32> = (0..dimension as u64)
        .map(|i| ((seed.wrapping_add(i * 2654435761) % 1000) as f32 / 1000.0) + 0.001)
        .collect();
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    raw.into_iter().map(|x| x / norm).collect()
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        match &self.init_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn generate(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let tokens = (text.chars().count() as u32).div_ceil(4).max(1);
                let cost = self.info.cost_for_tokens(u64::from(tokens));
                EmbeddingResult {
                    vector: fake_vector(text, self.info.dimension),
                    provider: self.kind,
                    model: self.info.model.clone(),
                    dimension: self.info.dimension,
                    latency: Duration::from_millis(5),
                    tokens: Some(tokens),
                    cost: (cost > 0.0).then_some(cost),
                    cache_hit: false,
                }
            })
            .collect())
    }

    async fn health_check(&self) -> ProviderHealth {
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => ProviderHealth::unhealthy(self.kind, err.to_string()),
            None => ProviderHealth::healthy(self.kind, Duration::from_millis(1)),
        }
    }
}

/// Defaults suited to tests: in-memory cache, no warm-up, a dummy remote key.
pub fn test_config() -> HybridConfig {
    let mut config = HybridConfig::default();
    config.remote.api_key = Some("sk-test".into());
    config
}

pub fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// How the stub embedding API answers.
#[derive(Clone, Copy)]
pub enum StubMode {
    /// Accept the connection, read the request, never answer.
    Hang,
    /// Answer with `dimension`-sized vectors and a usage block.
    Embed { dimension: usize },
}

pub struct StubApi {
    pub base_url: String,
    pub connections: Arc<AtomicUsize>,
}

impl StubApi {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Minimal OpenAI-style `/embeddings` endpoint on a loopback port.
pub async fn stub_api(mode: StubMode) -> StubApi {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }

                let dimension = match mode {
                    StubMode::Hang => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return;
                    }
                    StubMode::Embed { dimension } => dimension,
                };
                let request: Value =
                    serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
                let inputs: Vec<String> = request["input"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let data: Vec<Value> = inputs
                    .iter()
                    .enumerate()
                    .map(|(i, text)| {
                        json!({"object": "embedding", "index": i, "embedding": fake_vector(text, dimension)})
                    })
                    .collect();
                let total_tokens = inputs.len() as u64 * 1000;
                let body = json!({"data": data, "usage": {"total_tokens": total_tokens}}).to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    StubApi {
        base_url: format!("http://{addr}/v1"),
        connections,
    }
}
