use thiserror::Error;

/// Errors raised by the reasoning core. All of them abort the current run.
#[derive(Debug, Error)]
pub enum DmnError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),
    #[error("failed to restore weights: {0}")]
    WeightRestore(String),
    #[error("degenerate input: {0}")]
    NumericDegenerateInput(String),
    #[error("invalid sequence length: {0}")]
    InvalidLength(String),
    #[error("malformed corpus record: {0}")]
    Corpus(String),
}

impl DmnError {
    pub fn shape<S: Into<String>>(msg: S) -> Self {
        DmnError::ShapeMismatch(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        DmnError::Configuration(msg.into())
    }
}

pub type DmnResult<T> = Result<T, DmnError>;
