//! RPC method handlers.
//!
//! Boundary validation lives here: configuration values are range-checked
//! against `AppConfig` limits before the orchestrator is invoked, so the
//! engine core never sees an illegal value.

use std::sync::Arc;

use serde_json::json;

use atelier_core::config::GenerationConfig;
use atelier_engine::{EngineError, Generator};
use atelier_store::session::EntryKind;

use crate::config::AppConfig;
use crate::rpc::{self, RpcResponse};
use crate::wire;

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub generator: Arc<Generator>,
    pub config: AppConfig,
}

impl HandlerState {
    pub fn new(generator: Arc<Generator>, config: AppConfig) -> Self {
        Self { generator, config }
    }
}

/// Dispatch an RPC method to the appropriate handler.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        "generate.new" => generate_new(state, params, id).await,
        "generate.refine" => generate_refine(state, params, id).await,
        "generate.cancel" => generate_cancel(state, id),

        "session.current" => session_current(state, id),
        "session.history" => session_history(state, params, id),
        "session.clear" => session_clear(state, id),

        "config.get" => config_get(state, id),
        "system.ping" | "health" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn engine_error(id: Option<serde_json::Value>, error: &EngineError) -> RpcResponse {
    RpcResponse::error(id, error.wire_code(), error.to_string())
}

/// Build a generation config from request params over the configured
/// defaults.
fn config_from_params(
    defaults: GenerationConfig,
    params: &serde_json::Value,
) -> GenerationConfig {
    GenerationConfig {
        steps: rpc::optional_u32(params, "steps").unwrap_or(defaults.steps),
        guidance_scale: rpc::optional_f32(params, "guidance_scale").unwrap_or(defaults.guidance_scale),
        width: rpc::optional_u32(params, "width").unwrap_or(defaults.width),
        height: rpc::optional_u32(params, "height").unwrap_or(defaults.height),
        strength: rpc::optional_f32(params, "strength").unwrap_or(defaults.strength),
        seed: rpc::optional_u64(params, "seed"),
    }
}

async fn generate_new(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let prompt = match rpc::require_str(params, "prompt") {
        Ok(p) => p.to_string(),
        Err(e) => return RpcResponse::validation_failed(id, e),
    };
    if let Err(e) = state.config.validate_prompt(&prompt) {
        return RpcResponse::validation_failed(id, e);
    }

    let config = config_from_params(state.config.default_generation(), params);
    if let Err(e) = state.config.validate_generation(&config) {
        return RpcResponse::validation_failed(id, e);
    }

    match state.generator.generate_new(&prompt, &config).await {
        Ok(entry) => RpcResponse::success(id, wire::entry_to_json(&entry)),
        Err(e) => engine_error(id, &e),
    }
}

async fn generate_refine(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let modification = match rpc::require_str(params, "modification") {
        Ok(m) => m.to_string(),
        Err(e) => return RpcResponse::validation_failed(id, e),
    };
    if let Err(e) = state.config.validate_prompt(&modification) {
        return RpcResponse::validation_failed(id, e);
    }

    // Refinements default to the current image's dimensions so the output
    // stays visually aligned with its source.
    let mut defaults = state.config.default_generation();
    if let Some(current) = state.generator.current() {
        defaults.width = current.width;
        defaults.height = current.height;
    }

    let config = config_from_params(defaults, params);
    if let Err(e) = state.config.validate_generation(&config) {
        return RpcResponse::validation_failed(id, e);
    }

    match state.generator.refine(&modification, &config).await {
        Ok(entry) => RpcResponse::success(id, wire::entry_to_json(&entry)),
        Err(e) => engine_error(id, &e),
    }
}

fn generate_cancel(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    if state.generator.cancel() {
        // Acknowledged only: the engine is not guaranteed to stop before it
        // finishes the render.
        RpcResponse::success(id, json!({"acknowledged": true}))
    } else {
        RpcResponse::error(id, "NO_ACTIVE_GENERATION", "No generation in progress")
    }
}

fn session_current(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let snapshot = state.generator.session_snapshot();
    RpcResponse::success(id, wire::session_to_json(&snapshot))
}

fn session_history(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let limit = rpc::optional_u64(params, "limit").unwrap_or(50).clamp(1, 100) as usize;
    let offset = rpc::optional_u64(params, "offset").unwrap_or(0) as usize;

    let kind = rpc::optional_str(params, "kind")
        .or_else(|| rpc::optional_str(params, "type"))
        .unwrap_or("all");
    let kind_filter = match kind {
        "all" => None,
        "new" => Some(EntryKind::New),
        "refinement" => Some(EntryKind::Refinement),
        other => {
            return RpcResponse::validation_failed(id, format!("unknown history kind: {other}"))
        }
    };

    let history = state.generator.history();
    // Newest first; entries are appended in chronological order.
    let filtered: Vec<_> = history
        .iter()
        .rev()
        .filter(|e| kind_filter.as_ref().map_or(true, |k| &e.kind == k))
        .collect();

    let total = filtered.len();
    let page: Vec<_> = filtered.into_iter().skip(offset).take(limit).collect();

    RpcResponse::success(id, wire::history_to_json(&page, total, limit, offset))
}

fn session_clear(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    match state.generator.clear_session() {
        Ok(session_id) => RpcResponse::success(id, json!({"cleared": true, "session_id": session_id})),
        Err(e) => engine_error(id, &e),
    }
}

fn config_get(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let c = &state.config;
    RpcResponse::success(
        id,
        json!({
            "default_parameters": {
                "steps": c.default_steps,
                "guidance_scale": c.default_guidance_scale,
                "strength": c.default_strength,
                "width": c.default_width,
                "height": c.default_height,
            },
            "limits": {
                "min_steps": c.min_steps,
                "max_steps": c.max_steps,
                "min_guidance_scale": c.min_guidance_scale,
                "max_guidance_scale": c.max_guidance_scale,
                "min_strength": c.min_strength,
                "max_strength": c.max_strength,
                "min_dimension": c.min_dimension,
                "max_dimension": c.max_dimension,
                "dimension_multiple": c.dimension_multiple,
                "max_prompt_length": c.max_prompt_length,
            },
            "features": {
                "refinement": true,
                "thumbnails": c.enable_thumbnails,
            },
        }),
    )
}

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        json!({
            "status": "healthy",
            "busy": state.generator.is_busy(),
            "generation_count": state.generator.history().len(),
        }),
    )
}
