use atelier_core::errors::SynthesisError;
use atelier_core::image::ImageCodecError;
use atelier_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no current image to refine; generate one first")]
    NoCurrentImage,

    #[error("a generation is already in progress")]
    Busy,

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("image error: {0}")]
    Image(String),
}

impl EngineError {
    /// Stable code carried on terminal error events and RPC responses.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::NoCurrentImage => "NO_CURRENT_IMAGE",
            Self::Busy => "GENERATION_IN_PROGRESS",
            Self::Synthesis(_) => "GENERATION_FAILED",
            Self::Store(_) => "STORE_FAILED",
            Self::Image(_) => "IMAGE_FAILED",
        }
    }
}

impl From<ImageCodecError> for EngineError {
    fn from(e: ImageCodecError) -> Self {
        EngineError::Image(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(EngineError::NoCurrentImage.wire_code(), "NO_CURRENT_IMAGE");
        assert_eq!(EngineError::Busy.wire_code(), "GENERATION_IN_PROGRESS");
        assert_eq!(
            EngineError::Synthesis(SynthesisError::RenderFailed("boom".into())).wire_code(),
            "GENERATION_FAILED"
        );
    }
}
