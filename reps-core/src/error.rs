//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
///
/// Fallible functions return [`anyhow::Result`]; the variants below can be
/// recovered with `err.downcast_ref::<RepsError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepsError {
    /// Sampling was requested from an empty replay memory.
    #[error("Insufficient data: the replay memory is empty")]
    InsufficientData,

    /// A loss, a gradient or the temperature became non-finite or left its domain.
    #[error("Numerical instability in {context}: {value}")]
    NumericalInstability {
        /// Where the value was observed, e.g. `"dual_loss"`.
        context: String,

        /// The offending value.
        value: f32,
    },

    /// Invalid configuration detected at construction time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

impl RepsError {
    /// Shorthand for [`RepsError::NumericalInstability`].
    pub fn numerical(context: impl Into<String>, value: f32) -> Self {
        Self::NumericalInstability {
            context: context.into(),
            value,
        }
    }

    /// Shorthand for [`RepsError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Fails with [`RepsError::NumericalInstability`] if `value` is NaN or infinite.
pub fn ensure_finite(context: &str, value: f32) -> Result<f32, RepsError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RepsError::numerical(context, value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite("loss", 1.5), Ok(1.5));
        assert!(matches!(
            ensure_finite("loss", f32::NAN),
            Err(RepsError::NumericalInstability { .. })
        ));
        assert_eq!(
            ensure_finite("grad_norm", f32::INFINITY),
            Err(RepsError::numerical("grad_norm", f32::INFINITY))
        );
    }
}
