use thiserror::Error;

/// Registry Courier error types
#[derive(Error, Debug)]
pub enum CourierError {
    /// Image reference failed to parse
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// An exposed port declared by the image is not a valid port number
    #[error("Invalid exposed port '{0}'")]
    InvalidExposedPort(String),

    /// Credential material could not be resolved into a keychain
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Source archive or layer construction error
    #[error("Layer error: {0}")]
    LayerError(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::SerializationError(err.to_string())
    }
}

/// Result type alias for Registry Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;
