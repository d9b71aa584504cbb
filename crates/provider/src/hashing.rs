use fxhash::hash64;

use crate::normalize::l2_normalize_in_place;

const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic feature-hashing encoder used when no transformer is configured.
///
/// Word unigrams and character trigrams are hashed into signed buckets. Texts that
/// share vocabulary land close together under cosine similarity, which is enough for
/// caching, routing and shadow comparisons to behave realistically without model files.
#[derive(Debug, Clone)]
pub(crate) struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub(crate) fn encode(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut v, word.as_bytes(), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut v, gram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        if v.iter().all(|x| *x == 0.0) {
            // Punctuation-only input still gets a stable non-zero vector.
            self.add_feature(&mut v, lowered.as_bytes(), 1.0);
        }

        l2_normalize_in_place(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = hash64(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }

    pub(crate) fn encode_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}
