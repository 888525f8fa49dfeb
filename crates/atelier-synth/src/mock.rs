use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use atelier_core::errors::SynthesisError;
use atelier_core::image::ImageData;
use atelier_core::synthesis::{NewImageRequest, RefineImageRequest, StepCallback, SynthesisEngine};

/// Pre-programmed render outcomes for deterministic testing without a real
/// diffusion backend.
#[derive(Clone, Debug)]
pub enum MockRender {
    /// Render a solid image, reporting progress callbacks first.
    /// `emit_steps` overrides how many steps are reported (defaults to the
    /// request's step count).
    Image { emit_steps: Option<u32> },
    /// Fail the render with this error.
    Error(SynthesisError),
    /// Wait a duration, then resolve the inner render.
    Delayed(Duration, Box<MockRender>),
}

impl MockRender {
    pub fn image() -> Self {
        Self::Image { emit_steps: None }
    }

    pub fn image_with_steps(steps: u32) -> Self {
        Self::Image {
            emit_steps: Some(steps),
        }
    }

    pub fn delayed(delay: Duration, inner: MockRender) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

/// Mock engine that consumes pre-programmed renders in sequence.
pub struct MockEngine {
    renders: Mutex<VecDeque<MockRender>>,
    call_count: AtomicUsize,
    next_seed: AtomicU64,
}

impl MockEngine {
    pub fn new(renders: Vec<MockRender>) -> Self {
        Self {
            renders: Mutex::new(renders.into()),
            call_count: AtomicUsize::new(0),
            next_seed: AtomicU64::new(1000),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    fn next_render(&self) -> Result<MockRender, SynthesisError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.renders.lock().pop_front().ok_or_else(|| {
            SynthesisError::InvalidRequest(format!("MockEngine: no render configured for call {idx}"))
        })
    }

    async fn run(
        &self,
        render: MockRender,
        total_steps: u32,
        width: u32,
        height: u32,
        seed: u64,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError> {
        let mut current = render;
        loop {
            match current {
                MockRender::Delayed(delay, inner) => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return Err(SynthesisError::Cancelled),
                    }
                    current = *inner;
                }
                MockRender::Error(e) => return Err(e),
                MockRender::Image { emit_steps } => {
                    let started = Instant::now();
                    let steps = emit_steps.unwrap_or(total_steps);
                    for step in 1..=steps {
                        if cancel.is_cancelled() {
                            return Err(SynthesisError::Cancelled);
                        }
                        on_step(step, total_steps, started.elapsed().as_secs_f64());
                        tokio::task::yield_now().await;
                    }
                    return Ok(ImageData::solid(width, height, seed_color(seed)));
                }
            }
        }
    }
}

fn seed_color(seed: u64) -> [u8; 3] {
    [seed as u8, (seed >> 8) as u8, (seed >> 16) as u8]
}

#[async_trait]
impl SynthesisEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn random_seed(&self) -> u64 {
        self.next_seed.fetch_add(1, Ordering::Relaxed)
    }

    async fn synthesize_new(
        &self,
        request: &NewImageRequest,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError> {
        let render = self.next_render()?;
        self.run(
            render,
            request.steps,
            request.width,
            request.height,
            request.seed,
            on_step,
            cancel,
        )
        .await
    }

    async fn synthesize_refined(
        &self,
        request: &RefineImageRequest,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError> {
        let render = self.next_render()?;
        // Output matches the (already resized) source dimensions.
        self.run(
            render,
            request.steps,
            request.source.width(),
            request.source.height(),
            request.seed,
            on_step,
            cancel,
        )
        .await
    }
}
