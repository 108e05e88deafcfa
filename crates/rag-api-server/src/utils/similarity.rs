use anyhow::Result;

/// Calculate cosine similarity between two embedding vectors
/// Returns value between -1.0 (opposite) and 1.0 (identical)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!("Vector dimensions must match: {} != {}", a.len(), b.len());
    }

    if a.is_empty() {
        anyhow::bail!("Vectors cannot be empty");
    }

    // Calculate dot product
    let dot_product: f32 = a.iter()
        .zip(b.iter())
        .map(|(x, y)| x * y)
        .sum();

    // Calculate magnitudes
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    // Avoid division by zero
    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    // Cosine similarity = dot / (||a|| * ||b||)
    let similarity = dot_product / (magnitude_a * magnitude_b);

    // Clamp to [-1, 1] to handle floating point errors
    Ok(similarity.clamp(-1.0, 1.0))
}

/// Min-max normalize a set of scores into `[0, 1]` so the dense and
/// lexical sides of hybrid retrieval can be fused by weighted sum
/// despite living on different native scales (cosine vs. `ts_rank`).
/// A degenerate set (all scores equal) normalizes to `1.0` for every
/// entry rather than dividing by zero.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores.iter().map(|s| (s - min) / range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_opposite_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-1.0, -2.0, -3.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn test_zero_vector() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_min_max_normalize() {
        let scores = vec![0.2, 0.5, 0.9];
        let normalized = min_max_normalize(&scores);
        assert_eq!(normalized[0], 0.0);
        assert_eq!(normalized[2], 1.0);
        assert!((normalized[1] - (0.3 / 0.7)).abs() < 1e-6);
    }

    #[test]
    fn test_min_max_normalize_degenerate() {
        let scores = vec![0.4, 0.4, 0.4];
        let normalized = min_max_normalize(&scores);
        assert_eq!(normalized, vec![1.0, 1.0, 1.0]);
    }
}
