use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorComparison {
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f64,
    pub dimension_match: bool,
    pub legacy_dimension: usize,
    pub candidate_dimension: usize,
}

/// Cosine similarity between two vectors of possibly different length. The
/// shorter one is treated as zero-padded, which is the same as ignoring the
/// longer one's tail in the dot product. A zero vector compares as 0.
pub fn compare_vectors(legacy: &[f32], candidate: &[f32]) -> VectorComparison {
    let dot: f64 = legacy
        .iter()
        .zip(candidate)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let norm = |v: &[f32]| v.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let (na, nb) = (norm(legacy), norm(candidate));

    let similarity = if na == 0.0 || nb == 0.0 || !dot.is_finite() {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    };

    VectorComparison {
        similarity,
        dimension_match: legacy.len() == candidate.len(),
        legacy_dimension: legacy.len(),
        candidate_dimension: candidate.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, seed: u32) -> Vec<f32> {
        let v: Vec<f32> = (0..dim)
            .map(|i| (((i as u32).wrapping_mul(2654435761) ^ seed) % 1000) as f32 / 1000.0 - 0.5)
            .collect();
        let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / n).collect()
    }

    #[test]
    fn identical_vectors_are_fully_similar() {
        let v = unit(384, 7);
        let cmp = compare_vectors(&v, &v);
        assert!((cmp.similarity - 1.0).abs() < 1e-6);
        assert!(cmp.dimension_match);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        let v = unit(16, 3);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((compare_vectors(&v, &neg).similarity + 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_are_padded_and_flagged() {
        let small = unit(384, 1);
        let large = unit(1536, 2);
        let cmp = compare_vectors(&small, &large);
        assert!((-1.0..=1.0).contains(&cmp.similarity));
        assert!(!cmp.dimension_match);
        assert_eq!((cmp.legacy_dimension, cmp.candidate_dimension), (384, 1536));

        // A prefix of the longer vector compares above zero against the whole.
        let prefix = &large[..384];
        assert!(compare_vectors(prefix, &large).similarity > 0.0);
    }

    #[test]
    fn zero_or_empty_vectors_give_zero() {
        assert_eq!(compare_vectors(&[0.0; 4], &[1.0, 0.0, 0.0, 0.0]).similarity, 0.0);
        assert_eq!(compare_vectors(&[], &[1.0]).similarity, 0.0);
    }
}
