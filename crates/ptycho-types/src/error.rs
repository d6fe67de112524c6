use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtychoError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid reconstruction_parameter for {method}: {message}")]
    InvalidParameter { method: String, message: String },

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid state: {0}")]
    StateError(String),

    #[error("Linear algebra error: {0}")]
    LinAlg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NPZ error: {0}")]
    Npz(String),
}

pub type PtychoResult<T> = Result<T, PtychoError>;

impl PtychoError {
    /// Shape mismatch helper taking array shapes directly.
    pub fn shape_mismatch(name: &str, expected: &[usize], actual: &[usize]) -> Self {
        PtychoError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
