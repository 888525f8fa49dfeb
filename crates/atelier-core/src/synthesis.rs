use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::SynthesisError;
use crate::image::ImageData;

/// Step-progress callback: `(step, total_steps, elapsed_seconds)`.
///
/// Invoked zero or more times during a synthesis call with strictly
/// increasing `step`, terminating at `step == total_steps` or earlier on
/// internal early-stop. Must be cheap and must not block.
pub type StepCallback = Arc<dyn Fn(u32, u32, f64) + Send + Sync>;

/// Parameters for a text-to-image call.
#[derive(Clone, Debug)]
pub struct NewImageRequest {
    pub prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
}

/// Parameters for an image-to-image refinement call. The source image is
/// expected to already match the target output dimensions.
#[derive(Clone, Debug)]
pub struct RefineImageRequest {
    pub prompt: String,
    pub source: ImageData,
    pub seed: u64,
    pub steps: u32,
    pub guidance_scale: f32,
    pub strength: f32,
}

/// Boundary to the external image-synthesis engine.
///
/// The engine is a black box: given a prompt (plus an optional source image),
/// a deterministic seed, and a step count, it renders an image and reports
/// per-step progress through the callback.
///
/// Cancellation is best-effort only: implementations observe the token
/// between steps at most, and a render that is already in flight may run to
/// completion regardless.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Engine-side seed assignment for calls without an explicit seed.
    fn random_seed(&self) -> u64;

    async fn synthesize_new(
        &self,
        request: &NewImageRequest,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError>;

    async fn synthesize_refined(
        &self,
        request: &RefineImageRequest,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError>;
}
