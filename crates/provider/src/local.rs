//! In-process embedding provider.
//!
//! The model is loaded lazily on first use under an async mutex, so a burst of
//! first callers waits on one load instead of racing several. Inference is CPU
//! bound and runs on the blocking pool, bounded by a semaphore so it cannot starve
//! the async workers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};

use crate::config::{LocalBackendKind, LocalProviderConfig};
use crate::hashing::HashingEncoder;
#[cfg(feature = "onnx")]
use crate::onnx_backend::OnnxEncoder;
use crate::{
    estimate_tokens, validate_texts, EmbeddingError, EmbeddingProvider, EmbeddingResult,
    ProviderHealth, ProviderInfo, ProviderKind,
};

enum LocalModel {
    Hashing(HashingEncoder),
    #[cfg(feature = "onnx")]
    Onnx(OnnxEncoder),
}

impl LocalModel {
    fn load(config: &LocalProviderConfig) -> Result<Self, EmbeddingError> {
        match config.backend {
            LocalBackendKind::Hashing => Ok(LocalModel::Hashing(HashingEncoder::new(
                config.dimension,
            ))),
            #[cfg(feature = "onnx")]
            LocalBackendKind::Onnx => {
                let (model, tokenizer) = onnx_paths(config)?;
                OnnxEncoder::load(model, tokenizer, config.max_tokens).map(LocalModel::Onnx)
            }
            #[cfg(not(feature = "onnx"))]
            LocalBackendKind::Onnx => Err(EmbeddingError::ProviderUnavailable(
                "onnx backend requested but built without the `onnx` feature".into(),
            )),
        }
    }

    fn encode_batch(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = match self {
            LocalModel::Hashing(enc) => enc.encode_batch(texts),
            #[cfg(feature = "onnx")]
            LocalModel::Onnx(enc) => enc.encode_batch(texts, dimension)?,
        };
        debug_assert!(vectors.iter().all(|v| v.len() == dimension));
        Ok(vectors)
    }
}

fn onnx_paths(
    config: &LocalProviderConfig,
) -> Result<(&std::path::Path, &std::path::Path), EmbeddingError> {
    let model = config.model_path.as_deref().ok_or_else(|| {
        EmbeddingError::ProviderUnavailable("onnx backend requires model_path".into())
    })?;
    let tokenizer = config.tokenizer_path.as_deref().ok_or_else(|| {
        EmbeddingError::ProviderUnavailable("onnx backend requires tokenizer_path".into())
    })?;
    Ok((model, tokenizer))
}

pub struct LocalProvider {
    config: LocalProviderConfig,
    info: ProviderInfo,
    model: Mutex<Option<Arc<LocalModel>>>,
    workers: Arc<Semaphore>,
    loads: AtomicUsize,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Result<Self, EmbeddingError> {
        config.validate()?;
        let info = ProviderInfo {
            name: "local".into(),
            model: config.model_name.clone(),
            dimension: config.dimension,
            max_tokens: config.max_tokens,
            cost_per_1k_tokens: 0.0,
            max_batch_size: config.max_batch_size,
            rate_limit_rpm: None,
        };
        Ok(Self {
            workers: Arc::new(Semaphore::new(config.inference_workers)),
            config,
            info,
            model: Mutex::new(None),
            loads: AtomicUsize::new(0),
        })
    }

    /// Number of times the model has actually been loaded. Stays at 1 after warm-up.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    async fn model(&self) -> Result<Arc<LocalModel>, EmbeddingError> {
        let mut slot = self.model.lock().await;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let started = Instant::now();
        let config = self.config.clone();
        let model = tokio::task::spawn_blocking(move || LocalModel::load(&config))
            .await
            .map_err(|e| EmbeddingError::Inference(format!("model load task failed: {e}")))??;
        let model = Arc::new(model);
        *slot = Some(Arc::clone(&model));
        self.loads.fetch_add(1, Ordering::AcqRel);

        tracing::info!(
            model = %self.config.model_name,
            backend = ?self.config.backend,
            load_ms = started.elapsed().as_millis() as u64,
            "local embedding model loaded"
        );
        Ok(model)
    }

    fn check_artifacts(&self) -> Result<(), EmbeddingError> {
        if self.config.backend == LocalBackendKind::Onnx {
            let (model, tokenizer) = onnx_paths(&self.config)?;
            for path in [model, tokenizer] {
                if !path.exists() {
                    return Err(EmbeddingError::ProviderUnavailable(format!(
                        "model artifact not found: {}",
                        path.display()
                    )));
                }
            }
            if cfg!(not(feature = "onnx")) {
                return Err(EmbeddingError::ProviderUnavailable(
                    "onnx backend requested but built without the `onnx` feature".into(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        if !self.config.enabled {
            return Err(EmbeddingError::ProviderUnavailable(
                "local provider disabled".into(),
            ));
        }
        self.check_artifacts()
    }

    async fn generate(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        validate_texts(texts)?;
        let model = self.model().await?;
        let started = Instant::now();
        let dimension = self.config.dimension;

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.max_batch_size) {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|e| EmbeddingError::Inference(format!("worker pool closed: {e}")))?;
            let model = Arc::clone(&model);
            let chunk = chunk.to_vec();
            // Not cancellable once started; the blocking task runs to completion.
            let encoded = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                model.encode_batch(&chunk, dimension)
            })
            .await
            .map_err(|e| EmbeddingError::Inference(format!("inference task failed: {e}")))??;
            vectors.extend(encoded);
        }

        let latency = started.elapsed();
        Ok(texts
            .iter()
            .zip(vectors)
            .map(|(text, vector)| EmbeddingResult {
                dimension: vector.len(),
                vector,
                provider: ProviderKind::Local,
                model: self.config.model_name.clone(),
                latency,
                tokens: Some(estimate_tokens(text)),
                cost: Some(0.0),
                cache_hit: false,
            })
            .collect())
    }

    async fn health_check(&self) -> ProviderHealth {
        let started = Instant::now();
        match self.generate(&["health check".to_string()]).await {
            Ok(_) => ProviderHealth::healthy(ProviderKind::Local, started.elapsed()),
            Err(e) => ProviderHealth::unhealthy(ProviderKind::Local, e.to_string()),
        }
    }
}
