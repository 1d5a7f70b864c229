// ============================================================================
// Numeric Errors
// ============================================================================

/// Failure of checked fixed-point arithmetic or of parsing a price or
/// quantity from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum NumericError {
    #[error("fixed-point value out of range")]
    OutOfRange,
    #[error("more than {max_places} decimal places")]
    TooPrecise { max_places: u8 },
    #[error("malformed decimal literal")]
    Malformed,
}

pub type NumericResult<T> = Result<T, NumericError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            NumericError::TooPrecise { max_places: 9 }.to_string(),
            "more than 9 decimal places"
        );
        assert_eq!(NumericError::Malformed.to_string(), "malformed decimal literal");
    }
}
