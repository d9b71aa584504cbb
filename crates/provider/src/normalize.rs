/// Euclidean length of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > f32::EPSILON {
        let inv = norm.recip();
        v.iter_mut().for_each(|x| *x *= inv);
    }
}

/// Mean of `rows` token vectors laid out row-major in `data`, each `dims` wide,
/// counting only rows whose mask entry is non-zero.
pub fn masked_mean_pool(data: &[f32], mask: &[i64], dims: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dims];
    let mut kept = 0usize;
    for (row, &m) in data.chunks_exact(dims).zip(mask) {
        if m == 0 {
            continue;
        }
        kept += 1;
        for (acc, x) in pooled.iter_mut().zip(row) {
            *acc += x;
        }
    }
    if kept > 0 {
        let inv = 1.0 / kept as f32;
        pooled.iter_mut().for_each(|x| *x *= inv);
    }
    pooled
}
