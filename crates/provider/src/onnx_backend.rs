//! ONNX transformer encoder for the local provider.
//!
//! Batches are tokenized, padded to the longest sequence (capped at `max_tokens`),
//! run through one session call, then mean-pooled over the attention mask.

use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

use crate::normalize::{l2_normalize_in_place, masked_mean_pool};
use crate::EmbeddingError;

pub(crate) struct OnnxEncoder {
    /// `run` takes `&mut self`.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    needs_token_types: bool,
    max_tokens: usize,
}

struct EncodedDoc {
    ids: Vec<i64>,
    mask: Vec<i64>,
}

impl OnnxEncoder {
    pub(crate) fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_tokens: usize,
    ) -> Result<Self, EmbeddingError> {
        let unavailable = |reason: String| {
            EmbeddingError::ProviderUnavailable(format!(
                "failed to load {}: {reason}",
                model_path.display()
            ))
        };

        let session = Session::builder()
            .map_err(|e| unavailable(e.to_string()))?
            .with_intra_threads(2)
            .map_err(|e| unavailable(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| unavailable(e.to_string()))?;

        let needs_token_types = session.inputs.iter().any(|i| i.name == "token_type_ids");

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            EmbeddingError::ProviderUnavailable(format!(
                "failed to load tokenizer {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        tracing::debug!(
            model = %model_path.display(),
            needs_token_types,
            "onnx model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            needs_token_types,
            max_tokens,
        })
    }

    pub(crate) fn encode_batch(
        &self,
        texts: &[String],
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut docs = Vec::with_capacity(texts.len());
        let mut seq_len = 1usize;
        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
            let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
            let mut mask: Vec<i64> = encoding
                .get_attention_mask()
                .iter()
                .map(|&x| x as i64)
                .collect();
            ids.truncate(self.max_tokens);
            mask.truncate(self.max_tokens);
            seq_len = seq_len.max(ids.len());
            docs.push(EncodedDoc { ids, mask });
        }

        let batch = docs.len();
        let mut id_storage = Vec::with_capacity(batch * seq_len);
        let mut mask_storage = Vec::with_capacity(batch * seq_len);
        for EncodedDoc { ids, mask } in &docs {
            let pad = seq_len - ids.len();
            id_storage.extend_from_slice(ids);
            id_storage.extend(std::iter::repeat_n(0, pad));
            mask_storage.extend_from_slice(mask);
            mask_storage.extend(std::iter::repeat_n(0, pad));
        }

        let shape = vec![batch as i64, seq_len as i64];
        let tensor_err = |e: ort::Error| EmbeddingError::Inference(format!("tensor creation error: {e}"));
        let ids_tensor = Tensor::from_array((shape.clone(), id_storage)).map_err(tensor_err)?;
        let mask_tensor =
            Tensor::from_array((shape.clone(), mask_storage.clone())).map_err(tensor_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbeddingError::Inference(format!("session lock poisoned: {e}")))?;

        let outputs = if self.needs_token_types {
            let types_tensor =
                Tensor::from_array((shape, vec![0i64; batch * seq_len])).map_err(tensor_err)?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => types_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])
        }
        .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| EmbeddingError::Inference("model returned no outputs".into()))?;
        let (out_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Inference(format!("tensor extraction failed: {e}")))?;

        let mut vectors = Vec::with_capacity(batch);
        match out_shape.len() {
            // [batch, seq, dims]: token embeddings, pool them.
            3 => {
                let seq = out_shape[1] as usize;
                let dims = out_shape[2] as usize;
                for (b, doc_mask) in mask_storage.chunks_exact(seq_len).enumerate() {
                    let rows = &data[b * seq * dims..(b + 1) * seq * dims];
                    vectors.push(masked_mean_pool(rows, &doc_mask[..seq.min(seq_len)], dims));
                }
            }
            // [batch, dims]: already pooled.
            2 => {
                let dims = out_shape[1] as usize;
                vectors.extend(data.chunks_exact(dims).take(batch).map(<[f32]>::to_vec));
            }
            _ => {
                return Err(EmbeddingError::Inference(format!(
                    "unexpected output shape: {out_shape:?}"
                )))
            }
        }

        for v in &mut vectors {
            l2_normalize_in_place(v);
            v.resize(dimension, 0.0);
        }
        Ok(vectors)
    }
}
