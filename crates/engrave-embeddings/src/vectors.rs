//! Checks applied to every vector a provider hands back.

use engrave_core::error::{EngraveError, EngraveResult};

/// Reject a vector whose length differs from the configured dimension.
///
/// The vector index compares vectors by position, so a provider silently
/// serving another model would corrupt every score.
pub(crate) fn check_dimension(
    provider: &str,
    expected: usize,
    embedding: Vec<f32>,
) -> EngraveResult<Vec<f32>> {
    if embedding.len() != expected {
        return Err(EngraveError::bad_response(format!(
            "{} returned {} dimensions, expected {}",
            provider,
            embedding.len(),
            expected
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(EngraveError::bad_response(format!(
            "{} returned a non-finite component",
            provider
        )));
    }
    Ok(embedding)
}

/// Check a batch answer: one vector per input, each of the right length.
pub(crate) fn check_batch(
    provider: &str,
    expected: usize,
    inputs: usize,
    embeddings: Vec<Vec<f32>>,
) -> EngraveResult<Vec<Vec<f32>>> {
    if embeddings.len() != inputs {
        return Err(EngraveError::bad_response(format!(
            "{} returned {} embeddings for {} inputs",
            provider,
            embeddings.len(),
            inputs
        )));
    }
    embeddings
        .into_iter()
        .map(|embedding| check_dimension(provider, expected, embedding))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engrave_core::error::ErrorCode;

    #[test]
    fn test_dimension_mismatch_rejected() {
        assert_eq!(check_dimension("ollama", 3, vec![0.1, 0.2, 0.3]).unwrap().len(), 3);

        let err = check_dimension("ollama", 4, vec![0.1, 0.2, 0.3]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProvBadResponse);
        assert!(err.to_string().contains("3 dimensions, expected 4"));

        assert!(check_dimension("ollama", 2, vec![f32::NAN, 0.0]).is_err());
    }

    #[test]
    fn test_batch_count_and_shape() {
        let ok = check_batch("openai", 2, 2, vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(ok.len(), 2);

        let short = check_batch("openai", 2, 3, vec![vec![1.0, 0.0]]).unwrap_err();
        assert_eq!(short.code(), ErrorCode::ProvBadResponse);

        assert!(check_batch("openai", 2, 2, vec![vec![1.0, 0.0], vec![1.0]]).is_err());
    }
}
