//! Generation orchestrator — coordinates the session store, the prompt
//! interpreter, and the external synthesis engine.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atelier_core::config::GenerationConfig;
use atelier_core::events::GenerationEvent;
use atelier_core::ids::{GenerationId, SessionId};
use atelier_core::image::ImageData;
use atelier_core::synthesis::{NewImageRequest, RefineImageRequest, StepCallback, SynthesisEngine};
use atelier_store::session::{EntryParams, GenerationEntry, SessionState};
use atelier_store::{ImageStore, SessionStore};

use crate::error::EngineError;
use crate::guard::GenerationGuard;
use crate::interpreter;

/// Orchestrates one generation pipeline per process.
///
/// At most one synthesis call is in flight at a time (the guard fails fast
/// with Busy). Per attempt the event channel sees Started, zero or more
/// Progress events, and exactly one terminal Complete or Error. Busy and
/// NoCurrentImage rejections happen before an attempt starts and emit
/// nothing.
pub struct Generator {
    engine: Arc<dyn SynthesisEngine>,
    sessions: SessionStore,
    images: ImageStore,
    event_tx: broadcast::Sender<GenerationEvent>,
    guard: GenerationGuard,
    active_cancel: Mutex<Option<CancellationToken>>,
    thumbnail_size: Option<u32>,
}

impl Generator {
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        sessions: SessionStore,
        images: ImageStore,
        event_tx: broadcast::Sender<GenerationEvent>,
    ) -> Self {
        Self {
            engine,
            sessions,
            images,
            event_tx,
            guard: GenerationGuard::new(),
            active_cancel: Mutex::new(None),
            thumbnail_size: None,
        }
    }

    pub fn with_thumbnails(mut self, size: u32) -> Self {
        self.thumbnail_size = Some(size);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn current(&self) -> Option<GenerationEntry> {
        self.sessions.current()
    }

    pub fn history(&self) -> Vec<GenerationEntry> {
        self.sessions.history()
    }

    pub fn session_snapshot(&self) -> SessionState {
        self.sessions.snapshot()
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Generate a new image from a text prompt.
    pub async fn generate_new(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<GenerationEntry, EngineError> {
        let _permit = self.guard.try_acquire().ok_or(EngineError::Busy)?;

        let seed = config.seed.unwrap_or_else(|| self.engine.random_seed());
        let generation_id = GenerationId::new();
        info!(generation_id = %generation_id, seed, steps = config.steps, "starting generation");

        let request = NewImageRequest {
            prompt: prompt.to_string(),
            seed,
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            width: config.width,
            height: config.height,
        };

        let cancel = self.arm_cancellation();
        self.publish(GenerationEvent::Started {
            generation_id: generation_id.clone(),
            total_steps: config.steps,
        });

        let started = Instant::now();
        let result = self
            .engine
            .synthesize_new(&request, self.step_callback(generation_id.clone()), &cancel)
            .await;
        self.disarm_cancellation();

        let image = match result {
            Ok(image) => image,
            Err(e) => return Err(self.fail(&generation_id, e.into())),
        };
        let generation_time = started.elapsed().as_secs_f64();

        let params = EntryParams {
            id: generation_id,
            prompt: prompt.to_string(),
            seed,
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            image_ref: String::new(), // assigned in commit
            width: config.width,
            height: config.height,
            generation_time: Some(generation_time),
        };
        self.commit(&image, params, None)
    }

    /// Refine the current image from a natural-language modification.
    ///
    /// The new prompt composes over the *current* entry's prompt, so
    /// successive refinements drift intentionally. The seed is carried over
    /// from the current entry unless explicitly overridden — refinement
    /// without seed reuse would produce an unrelated image.
    pub async fn refine(
        &self,
        modification: &str,
        config: &GenerationConfig,
    ) -> Result<GenerationEntry, EngineError> {
        let _permit = self.guard.try_acquire().ok_or(EngineError::Busy)?;
        let current = self.sessions.current().ok_or(EngineError::NoCurrentImage)?;

        let seed = config.seed.unwrap_or(current.seed);
        let new_prompt = interpreter::interpret(&current.prompt, modification);
        let generation_id = GenerationId::new();
        info!(
            generation_id = %generation_id,
            parent_id = %current.id,
            seed,
            "starting refinement"
        );

        // The persisted image may not match the requested output size;
        // resize before handing it to the engine rather than aborting.
        let source = self.images.load(&current.image_ref)?;
        let source = source.resized(config.width, config.height)?;

        let request = RefineImageRequest {
            prompt: new_prompt.clone(),
            source,
            seed,
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            strength: config.strength,
        };

        let cancel = self.arm_cancellation();
        self.publish(GenerationEvent::Started {
            generation_id: generation_id.clone(),
            total_steps: config.steps,
        });

        let started = Instant::now();
        let result = self
            .engine
            .synthesize_refined(&request, self.step_callback(generation_id.clone()), &cancel)
            .await;
        self.disarm_cancellation();

        let image = match result {
            Ok(image) => image,
            Err(e) => return Err(self.fail(&generation_id, e.into())),
        };
        let generation_time = started.elapsed().as_secs_f64();

        let params = EntryParams {
            id: generation_id,
            prompt: new_prompt,
            seed,
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            image_ref: String::new(),
            width: config.width,
            height: config.height,
            generation_time: Some(generation_time),
        };
        self.commit(
            &image,
            params,
            Some((modification.to_string(), config.strength, current.id)),
        )
    }

    /// Request cancellation of the in-flight generation, if any.
    ///
    /// Best-effort: the engine observes the token between steps at most, so
    /// the render may still run to completion. Returns whether there was an
    /// active generation to signal.
    pub fn cancel(&self) -> bool {
        match self.active_cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                info!("cancellation requested for active generation");
                true
            }
            None => false,
        }
    }

    /// Clear the session history. Returns the fresh session id.
    pub fn clear_session(&self) -> Result<SessionId, EngineError> {
        let session_id = self.sessions.clear()?;
        self.publish(GenerationEvent::SessionUpdate {
            generation_count: 0,
            current_generation_id: None,
        });
        Ok(session_id)
    }

    // Persist the image, build the entry, commit it to the session, and emit
    // the terminal events. Any failure here is reported exactly like a
    // synthesis failure: one Error event, no partial entry.
    fn commit(
        &self,
        image: &ImageData,
        mut params: EntryParams,
        refinement: Option<(String, f32, GenerationId)>,
    ) -> Result<GenerationEntry, EngineError> {
        let generation_id = params.id.clone();

        params.image_ref = match self.images.save(image, &generation_id) {
            Ok(reference) => reference,
            Err(e) => return Err(self.fail(&generation_id, e.into())),
        };

        if let Some(size) = self.thumbnail_size {
            if let Err(e) = self.images.save_thumbnail(image, &generation_id, size) {
                warn!(generation_id = %generation_id, error = %e, "thumbnail creation failed");
            }
        }

        let total_steps = params.steps;
        let elapsed = params.generation_time.unwrap_or(0.0);
        let image_ref = params.image_ref.clone();

        let entry = match refinement {
            Some((modification, strength, parent_id)) => {
                GenerationEntry::refinement(params, modification, strength, parent_id)
            }
            None => GenerationEntry::new_image(params),
        };

        if let Err(e) = self.sessions.add_generation(entry.clone()) {
            return Err(self.fail(&generation_id, e.into()));
        }

        self.publish(GenerationEvent::Complete {
            generation_id,
            image_ref,
            total_steps,
            elapsed_seconds: elapsed,
        });
        self.publish(GenerationEvent::SessionUpdate {
            generation_count: self.sessions.with_state(SessionState::generation_count),
            current_generation_id: Some(entry.id.clone()),
        });

        Ok(entry)
    }

    fn fail(&self, generation_id: &GenerationId, error: EngineError) -> EngineError {
        warn!(generation_id = %generation_id, error = %error, "generation failed");
        self.publish(GenerationEvent::Error {
            generation_id: generation_id.clone(),
            code: error.wire_code().to_string(),
            message: error.to_string(),
        });
        error
    }

    fn step_callback(&self, generation_id: GenerationId) -> StepCallback {
        let tx = self.event_tx.clone();
        Arc::new(move |step, total_steps, elapsed_seconds| {
            let _ = tx.send(GenerationEvent::Progress {
                generation_id: generation_id.clone(),
                step,
                total_steps,
                elapsed_seconds,
            });
        })
    }

    fn arm_cancellation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.active_cancel.lock() = Some(token.clone());
        token
    }

    fn disarm_cancellation(&self) {
        *self.active_cancel.lock() = None;
    }

    fn publish(&self, event: GenerationEvent) {
        // send only fails when no receiver is attached, which is fine
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use atelier_core::errors::SynthesisError;
    use atelier_store::session::EntryKind;
    use atelier_synth::mock::{MockEngine, MockRender};

    struct Fixture {
        generator: Arc<Generator>,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn setup(renders: Vec<MockRender>) -> Fixture {
        let dir = std::env::temp_dir().join(format!("atelier-gen-test-{}", uuid::Uuid::now_v7()));
        let sessions = SessionStore::open(&dir.join("session.json")).unwrap();
        let images = ImageStore::open(&dir.join("images")).unwrap();
        let (event_tx, _) = broadcast::channel(256);
        let engine = Arc::new(MockEngine::new(renders));
        let generator = Arc::new(Generator::new(engine, sessions, images, event_tx));
        Fixture { generator, dir }
    }

    #[tokio::test]
    async fn generate_new_appends_entry_and_repoints() {
        let f = setup(vec![MockRender::image()]);
        let entry = f
            .generator
            .generate_new("a blue ball", &GenerationConfig::default())
            .await
            .unwrap();

        assert_eq!(entry.kind, EntryKind::New);
        assert_eq!(entry.prompt, "a blue ball");
        assert!(entry.modification.is_none());
        assert_eq!(f.generator.history().len(), 1);
        assert_eq!(f.generator.current().unwrap().id, entry.id);
        assert!(f.generator.images().exists(&entry.image_ref));
    }

    #[tokio::test]
    async fn explicit_seed_is_honored() {
        let f = setup(vec![MockRender::image()]);
        let config = GenerationConfig {
            seed: Some(1234),
            ..Default::default()
        };
        let entry = f.generator.generate_new("a cat", &config).await.unwrap();
        assert_eq!(entry.seed, 1234);
    }

    #[tokio::test]
    async fn refine_without_current_is_not_ready() {
        let f = setup(vec![]);
        let result = f
            .generator
            .refine("make it red", &GenerationConfig::default())
            .await;
        assert!(matches!(result, Err(EngineError::NoCurrentImage)));
        assert!(!f.generator.is_busy());
    }

    #[tokio::test]
    async fn refinement_reuses_parent_seed() {
        let f = setup(vec![MockRender::image(), MockRender::image()]);
        let config = GenerationConfig {
            seed: Some(77),
            ..Default::default()
        };
        let parent = f.generator.generate_new("a blue ball", &config).await.unwrap();

        let refined = f
            .generator
            .refine("make the ball red", &GenerationConfig::default())
            .await
            .unwrap();

        assert_eq!(refined.seed, 77);
        assert_eq!(refined.kind, EntryKind::Refinement);
        assert_eq!(refined.parent_id.as_ref(), Some(&parent.id));
        assert_eq!(refined.modification.as_deref(), Some("make the ball red"));
        assert_eq!(refined.strength, Some(0.6));
    }

    #[tokio::test]
    async fn refinement_composes_over_current_prompt() {
        let f = setup(vec![MockRender::image(), MockRender::image(), MockRender::image()]);
        f.generator
            .generate_new("a house", &GenerationConfig::default())
            .await
            .unwrap();

        let first = f
            .generator
            .refine("add a tree", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(first.prompt, "a house, with a tree");

        // The second refinement starts from the first one's prompt.
        let second = f
            .generator
            .refine("add a moon", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(second.prompt, "a house, with a tree, with a moon");
        assert_eq!(second.parent_id.as_ref(), Some(&first.id));
    }

    #[tokio::test]
    async fn refinement_resizes_mismatched_source() {
        let f = setup(vec![MockRender::image(), MockRender::image()]);
        let big = GenerationConfig {
            width: 64,
            height: 64,
            ..Default::default()
        };
        f.generator.generate_new("a cat", &big).await.unwrap();

        let small = GenerationConfig {
            width: 32,
            height: 48,
            ..Default::default()
        };
        let refined = f.generator.refine("add a hat", &small).await.unwrap();
        assert_eq!(refined.width, 32);
        assert_eq!(refined.height, 48);

        let engine_saw = f.generator.images().load(&refined.image_ref).unwrap();
        assert_eq!(engine_saw.width(), 32);
        assert_eq!(engine_saw.height(), 48);
    }

    #[tokio::test]
    async fn busy_rejection_leaves_session_untouched() {
        let f = setup(vec![
            MockRender::delayed(Duration::from_millis(300), MockRender::image()),
            MockRender::image(),
        ]);

        let slow = Arc::clone(&f.generator);
        let first = tokio::spawn(async move {
            slow.generate_new("slow prompt", &GenerationConfig::default()).await
        });

        // Let the first run take the guard.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.generator.is_busy());

        let second = f
            .generator
            .generate_new("second prompt", &GenerationConfig::default())
            .await;
        assert!(matches!(second, Err(EngineError::Busy)));
        assert_eq!(f.generator.history().len(), 0);

        let entry = first.await.unwrap().unwrap();
        assert_eq!(f.generator.history().len(), 1);
        assert_eq!(f.generator.current().unwrap().id, entry.id);
    }

    #[tokio::test]
    async fn synthesis_failure_appends_nothing_and_releases_guard() {
        let f = setup(vec![
            MockRender::Error(SynthesisError::RenderFailed("oom".into())),
            MockRender::image(),
        ]);

        let result = f
            .generator
            .generate_new("a cat", &GenerationConfig::default())
            .await;
        assert!(matches!(result, Err(EngineError::Synthesis(_))));
        assert_eq!(f.generator.history().len(), 0);
        assert!(!f.generator.is_busy());

        // Guard released: the next attempt goes through.
        let retry = f
            .generator
            .generate_new("a cat", &GenerationConfig::default())
            .await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn event_sequence_has_exactly_one_terminal() {
        let f = setup(vec![MockRender::image_with_steps(4)]);
        let mut rx = f.generator.subscribe();

        let config = GenerationConfig {
            steps: 4,
            ..Default::default()
        };
        f.generator.generate_new("a cat", &config).await.unwrap();

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type().to_string());
        }

        assert_eq!(types.first().map(String::as_str), Some("started"));
        let progress = types.iter().filter(|t| *t == "progress").count();
        assert_eq!(progress, 4);
        let terminals = types
            .iter()
            .filter(|t| *t == "complete" || *t == "error")
            .count();
        assert_eq!(terminals, 1);
        assert_eq!(types.last().map(String::as_str), Some("session_update"));
    }

    #[tokio::test]
    async fn failed_attempt_emits_error_event() {
        let f = setup(vec![MockRender::Error(SynthesisError::RenderFailed("boom".into()))]);
        let mut rx = f.generator.subscribe();

        let _ = f
            .generator
            .generate_new("a cat", &GenerationConfig::default())
            .await;

        let mut saw_error = false;
        let mut saw_complete = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                GenerationEvent::Error { code, .. } => {
                    saw_error = true;
                    assert_eq!(code, "GENERATION_FAILED");
                }
                GenerationEvent::Complete { .. } => saw_complete = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(!saw_complete);
    }

    #[tokio::test]
    async fn progress_steps_strictly_increase() {
        let f = setup(vec![MockRender::image_with_steps(6)]);
        let mut rx = f.generator.subscribe();

        let config = GenerationConfig {
            steps: 6,
            ..Default::default()
        };
        f.generator.generate_new("a cat", &config).await.unwrap();

        let mut last = 0;
        while let Ok(event) = rx.try_recv() {
            if let GenerationEvent::Progress { step, total_steps, .. } = event {
                assert!(step > last, "step {step} not greater than {last}");
                assert_eq!(total_steps, 6);
                last = step;
            }
        }
        assert_eq!(last, 6);
    }

    #[tokio::test]
    async fn cancel_without_active_generation_returns_false() {
        let f = setup(vec![]);
        assert!(!f.generator.cancel());
    }

    #[tokio::test]
    async fn cancel_interrupts_step_loop() {
        let f = setup(vec![MockRender::delayed(
            Duration::from_millis(200),
            MockRender::image_with_steps(8),
        )]);

        let gen = Arc::clone(&f.generator);
        let run = tokio::spawn(async move {
            gen.generate_new("slow", &GenerationConfig::default()).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.generator.cancel());

        let result = run.await.unwrap();
        assert!(matches!(
            result,
            Err(EngineError::Synthesis(SynthesisError::Cancelled))
        ));
        assert_eq!(f.generator.history().len(), 0);
        assert!(!f.generator.is_busy());
    }

    #[tokio::test]
    async fn clear_session_resets_pointer_and_emits_update() {
        let f = setup(vec![MockRender::image()]);
        f.generator
            .generate_new("a cat", &GenerationConfig::default())
            .await
            .unwrap();
        let old_session = f.generator.session_snapshot().session_id;

        let mut rx = f.generator.subscribe();
        let new_session = f.generator.clear_session().unwrap();

        assert_ne!(new_session, old_session);
        assert!(f.generator.current().is_none());
        assert_eq!(f.generator.history().len(), 0);

        let event = rx.try_recv().unwrap();
        match event {
            GenerationEvent::SessionUpdate {
                generation_count,
                current_generation_id,
            } => {
                assert_eq!(generation_count, 0);
                assert!(current_generation_id.is_none());
            }
            other => panic!("expected session_update, got {other:?}"),
        }
    }
}
