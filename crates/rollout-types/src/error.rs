//! Encoding errors raised before anything is submitted on-chain.

/// A parameter/type mismatch detected while building call data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// A type tag could not be parsed as a Solidity type.
    UnknownType { ty: String, reason: String },
    /// `paramTypes` and `params` have different lengths.
    ArityMismatch { expected: usize, got: usize },
    /// A value does not fit the declared type.
    InvalidValue {
        ty: String,
        value: String,
        reason: String,
    },
    /// A function signature is not of the form `name(type,...)`.
    InvalidSignature { signature: String },
    /// The signature's argument list disagrees with `paramTypes`.
    SignatureMismatch {
        signature: String,
        param_types: Vec<String>,
    },
    /// Return data or calldata could not be decoded.
    Decode { reason: String },
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::UnknownType { ty, reason } => {
                write!(f, "unknown parameter type `{}`: {}", ty, reason)
            }
            EncodingError::ArityMismatch { expected, got } => write!(
                f,
                "parameter count mismatch: {} types declared, {} values given",
                expected, got
            ),
            EncodingError::InvalidValue { ty, value, reason } => {
                write!(f, "value {} is not a valid `{}`: {}", value, ty, reason)
            }
            EncodingError::InvalidSignature { signature } => {
                write!(f, "invalid function signature `{}`", signature)
            }
            EncodingError::SignatureMismatch {
                signature,
                param_types,
            } => write!(
                f,
                "signature `{}` does not match parameter types [{}]",
                signature,
                param_types.join(",")
            ),
            EncodingError::Decode { reason } => write!(f, "failed to decode ABI data: {}", reason),
        }
    }
}

impl std::error::Error for EncodingError {}
