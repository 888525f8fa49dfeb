//! HTTP client for a diffusion sidecar.
//!
//! The sidecar exposes blocking render endpoints (`/txt2img`, `/img2img`)
//! plus a `/progress` endpoint that reports the in-flight render's step
//! counter. While a render request is pending we poll `/progress` and feed
//! the step callback; the callback therefore fires on a sampling interval,
//! not on every denoising step the backend runs.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use atelier_core::errors::SynthesisError;
use atelier_core::image::ImageData;
use atelier_core::synthesis::{NewImageRequest, RefineImageRequest, StepCallback, SynthesisEngine};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub struct HttpEngine {
    client: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct Txt2ImgBody<'a> {
    prompt: &'a str,
    seed: u64,
    steps: u32,
    guidance_scale: f32,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct Img2ImgBody<'a> {
    prompt: &'a str,
    init_image: String,
    seed: u64,
    steps: u32,
    guidance_scale: f32,
    strength: f32,
}

#[derive(Deserialize)]
struct RenderResponse {
    image: String,
}

#[derive(Deserialize)]
struct ProgressResponse {
    step: u32,
    total_steps: u32,
    elapsed_seconds: f64,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SynthesisError::EngineUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_render<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ImageData, SynthesisError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::from_status(status, body));
        }

        let render: RenderResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::MalformedResponse(e.to_string()))?;

        let png = base64::engine::general_purpose::STANDARD
            .decode(&render.image)
            .map_err(|e| SynthesisError::MalformedResponse(format!("bad image payload: {e}")))?;
        ImageData::from_png_bytes(png)
            .map_err(|e| SynthesisError::MalformedResponse(e.to_string()))
    }

    /// Run a render request while polling `/progress` for step callbacks.
    ///
    /// Cancellation is best-effort: a cancel request is forwarded to the
    /// sidecar once, but the render future is still awaited to completion.
    async fn drive<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError> {
        let render = self.post_render(path, body);
        tokio::pin!(render);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate first tick

        let mut last_step = 0;
        let mut cancel_forwarded = false;

        loop {
            tokio::select! {
                result = &mut render => return result,
                _ = ticker.tick() => {
                    if cancel.is_cancelled() && !cancel_forwarded {
                        cancel_forwarded = true;
                        self.forward_cancel().await;
                    }
                    match self.fetch_progress().await {
                        Ok(progress) if progress.step > last_step => {
                            last_step = progress.step;
                            on_step(progress.step, progress.total_steps, progress.elapsed_seconds);
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "progress poll failed"),
                    }
                }
            }
        }
    }

    async fn fetch_progress(&self) -> Result<ProgressResponse, SynthesisError> {
        let response = self
            .client
            .get(self.url("/progress"))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        response
            .json()
            .await
            .map_err(|e| SynthesisError::MalformedResponse(e.to_string()))
    }

    async fn forward_cancel(&self) {
        if let Err(e) = self.client.post(self.url("/cancel")).send().await {
            warn!(error = %e, "failed to forward cancel to engine");
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SynthesisError {
    if e.is_timeout() {
        SynthesisError::Timeout(DEFAULT_REQUEST_TIMEOUT)
    } else {
        SynthesisError::EngineUnavailable(e.to_string())
    }
}

#[async_trait]
impl SynthesisEngine for HttpEngine {
    fn name(&self) -> &str {
        "http"
    }

    fn random_seed(&self) -> u64 {
        // 32-bit range, matching what diffusion backends accept
        u64::from(rand::thread_rng().gen::<u32>())
    }

    async fn synthesize_new(
        &self,
        request: &NewImageRequest,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError> {
        let body = Txt2ImgBody {
            prompt: &request.prompt,
            seed: request.seed,
            steps: request.steps,
            guidance_scale: request.guidance_scale,
            width: request.width,
            height: request.height,
        };
        self.drive("/txt2img", &body, on_step, cancel).await
    }

    async fn synthesize_refined(
        &self,
        request: &RefineImageRequest,
        on_step: StepCallback,
        cancel: &CancellationToken,
    ) -> Result<ImageData, SynthesisError> {
        let body = Img2ImgBody {
            prompt: &request.prompt,
            init_image: base64::engine::general_purpose::STANDARD
                .encode(request.source.png_bytes()),
            seed: request.seed,
            steps: request.steps,
            guidance_scale: request.guidance_scale,
            strength: request.strength,
        };
        self.drive("/img2img", &body, on_step, cancel).await
    }
}
