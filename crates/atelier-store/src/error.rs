#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("image error: {0}")]
    Image(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<atelier_core::image::ImageCodecError> for StoreError {
    fn from(e: atelier_core::image::ImageCodecError) -> Self {
        StoreError::Image(e.to_string())
    }
}
