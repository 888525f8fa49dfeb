//! Wire-format conversion for WebSocket push events and RPC results.

use serde::Serialize;
use serde_json::json;

use atelier_core::events::GenerationEvent;
use atelier_store::session::{GenerationEntry, SessionState};

/// Push-event envelope: `{ type, generation_id?, timestamp, data, error? }`.
#[derive(Debug, Serialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    pub timestamp: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Progress payload with the derived percentage and ETA.
pub fn progress_data(step: u32, total_steps: u32, elapsed_seconds: f64, status: &str) -> serde_json::Value {
    let percentage = if total_steps > 0 {
        f64::from(step) / f64::from(total_steps) * 100.0
    } else {
        0.0
    };
    let eta_seconds =
        elapsed_seconds / f64::from(step.max(1)) * f64::from(total_steps.saturating_sub(step));

    json!({
        "step": step,
        "total_steps": total_steps,
        "percentage": round2(percentage),
        "eta_seconds": round1(eta_seconds),
        "elapsed_seconds": round1(elapsed_seconds),
        "status": status,
    })
}

/// Convert an internal event to its wire shape.
pub fn event_to_wire(event: &GenerationEvent) -> WireEvent {
    let generation_id = event.generation_id().map(ToString::to_string);
    let timestamp = now_iso8601();

    match event {
        GenerationEvent::Started { total_steps, .. } => WireEvent {
            event_type: "started".into(),
            generation_id,
            timestamp,
            data: progress_data(0, *total_steps, 0.0, "generating"),
            error: None,
        },
        GenerationEvent::Progress {
            step,
            total_steps,
            elapsed_seconds,
            ..
        } => WireEvent {
            event_type: "progress".into(),
            generation_id,
            timestamp,
            data: progress_data(*step, *total_steps, *elapsed_seconds, "generating"),
            error: None,
        },
        GenerationEvent::Complete {
            image_ref,
            total_steps,
            elapsed_seconds,
            ..
        } => {
            let mut data = progress_data(*total_steps, *total_steps, *elapsed_seconds, "complete");
            data["image_url"] = json!(image_url(image_ref));
            WireEvent {
                event_type: "complete".into(),
                generation_id,
                timestamp,
                data,
                error: None,
            }
        }
        GenerationEvent::Error { code, message, .. } => WireEvent {
            event_type: "error".into(),
            generation_id,
            timestamp,
            data: json!({"status": "error"}),
            error: Some(json!({"code": code, "message": message})),
        },
        GenerationEvent::SessionUpdate {
            generation_count,
            current_generation_id,
        } => WireEvent {
            event_type: "session_update".into(),
            generation_id,
            timestamp,
            data: json!({
                "generation_count": generation_count,
                "current_generation_id": current_generation_id,
            }),
            error: None,
        },
    }
}

pub fn serialize_event(event: &GenerationEvent) -> Option<String> {
    serde_json::to_string(&event_to_wire(event)).ok()
}

pub fn image_url(reference: &str) -> String {
    format!("/images/{reference}")
}

pub fn thumbnail_url(entry: &GenerationEntry) -> String {
    format!("/thumbnails/{}_thumb.jpg", entry.id)
}

/// Entry as exposed over the API.
pub fn entry_to_json(entry: &GenerationEntry) -> serde_json::Value {
    json!({
        "id": entry.id,
        "kind": entry.kind.to_string(),
        "prompt": entry.prompt,
        "modification": entry.modification,
        "parent_id": entry.parent_id,
        "timestamp": entry.timestamp,
        "image_url": image_url(&entry.image_ref),
        "thumbnail_url": thumbnail_url(entry),
        "metadata": {
            "seed": entry.seed,
            "steps": entry.steps,
            "guidance_scale": entry.guidance_scale,
            "strength": entry.strength,
            "width": entry.width,
            "height": entry.height,
            "generation_time": entry.generation_time,
        },
    })
}

pub fn session_to_json(state: &SessionState) -> serde_json::Value {
    json!({
        "session_id": state.session_id,
        "created_at": state.created_at,
        "updated_at": state.updated_at,
        "generation_count": state.generation_count(),
        "current_image": state.current_generation().map(entry_to_json),
    })
}

pub fn history_to_json(
    entries: &[&GenerationEntry],
    total: usize,
    limit: usize,
    offset: usize,
) -> serde_json::Value {
    json!({
        "total": total,
        "limit": limit,
        "offset": offset,
        "generations": entries.iter().map(|e| entry_to_json(e)).collect::<Vec<_>>(),
    })
}
