use chrono::Utc;
use serde::{Deserialize, Serialize};

use atelier_core::ids::{GenerationId, SessionId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    New,
    Refinement,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Refinement => write!(f, "refinement"),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "refinement" => Ok(Self::Refinement),
            other => Err(format!("unknown entry kind: {other}")),
        }
    }
}

/// One immutable record of a synthesis event. Entries are append-only:
/// never edited or reordered after creation.
///
/// Refinement entries always carry `modification`, `strength`, and
/// `parent_id`; new entries never do. The constructors are the only way the
/// rest of the codebase builds entries, which is what holds that invariant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationEntry {
    pub id: GenerationId,
    pub timestamp: String,
    pub kind: EntryKind,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification: Option<String>,
    pub seed: u64,
    pub steps: u32,
    pub guidance_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
    pub image_ref: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<GenerationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time: Option<f64>,
}

/// Everything a new entry shares with a refinement entry.
#[derive(Clone, Debug)]
pub struct EntryParams {
    pub id: GenerationId,
    pub prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub guidance_scale: f32,
    pub image_ref: String,
    pub width: u32,
    pub height: u32,
    pub generation_time: Option<f64>,
}

impl GenerationEntry {
    pub fn new_image(params: EntryParams) -> Self {
        Self {
            id: params.id,
            timestamp: Utc::now().to_rfc3339(),
            kind: EntryKind::New,
            prompt: params.prompt,
            modification: None,
            seed: params.seed,
            steps: params.steps,
            guidance_scale: params.guidance_scale,
            strength: None,
            image_ref: params.image_ref,
            width: params.width,
            height: params.height,
            parent_id: None,
            generation_time: params.generation_time,
        }
    }

    pub fn refinement(
        params: EntryParams,
        modification: String,
        strength: f32,
        parent_id: GenerationId,
    ) -> Self {
        Self {
            id: params.id,
            timestamp: Utc::now().to_rfc3339(),
            kind: EntryKind::Refinement,
            prompt: params.prompt,
            modification: Some(modification),
            seed: params.seed,
            steps: params.steps,
            guidance_scale: params.guidance_scale,
            strength: Some(strength),
            image_ref: params.image_ref,
            width: params.width,
            height: params.height,
            parent_id: Some(parent_id),
            generation_time: params.generation_time,
        }
    }

    pub fn is_refinement(&self) -> bool {
        self.kind == EntryKind::Refinement
    }
}

/// The mutable conversation: an ordered history of entries plus a pointer to
/// the current one. The pointer is a weak lookup into the sequence, never a
/// second owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub created_at: String,
    pub updated_at: String,
    pub current_generation_id: Option<GenerationId>,
    #[serde(default)]
    pub generations: Vec<GenerationEntry>,
}

impl SessionState {
    pub fn create_new() -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            session_id: SessionId::new(),
            created_at: now.clone(),
            updated_at: now,
            current_generation_id: None,
            generations: Vec::new(),
        }
    }

    pub fn current_generation(&self) -> Option<&GenerationEntry> {
        let id = self.current_generation_id.as_ref()?;
        self.generations.iter().find(|g| &g.id == id)
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Append an entry, repoint the current pointer to it, refresh
    /// `updated_at`.
    pub fn add_generation(&mut self, entry: GenerationEntry) {
        self.current_generation_id = Some(entry.id.clone());
        self.generations.push(entry);
        self.updated_at = Utc::now().to_rfc3339();
    }

    /// Drop all history and null the pointer. The session id is untouched;
    /// assigning a fresh one is the store's concern.
    pub fn clear(&mut self) {
        self.generations.clear();
        self.current_generation_id = None;
        self.updated_at = Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(prompt: &str) -> GenerationEntry {
        GenerationEntry::new_image(EntryParams {
            id: GenerationId::new(),
            prompt: prompt.into(),
            seed: 7,
            steps: 28,
            guidance_scale: 3.5,
            image_ref: "img.png".into(),
            width: 1024,
            height: 1024,
            generation_time: Some(12.5),
        })
    }

    #[test]
    fn new_entry_carries_no_refinement_fields() {
        let e = entry("a cat");
        assert_eq!(e.kind, EntryKind::New);
        assert!(e.modification.is_none());
        assert!(e.strength.is_none());
        assert!(e.parent_id.is_none());
    }

    #[test]
    fn refinement_entry_carries_all_refinement_fields() {
        let parent = entry("a cat");
        let e = GenerationEntry::refinement(
            EntryParams {
                id: GenerationId::new(),
                prompt: "a red cat".into(),
                seed: parent.seed,
                steps: 28,
                guidance_scale: 3.5,
                image_ref: "img2.png".into(),
                width: 1024,
                height: 1024,
                generation_time: None,
            },
            "make it red".into(),
            0.6,
            parent.id.clone(),
        );
        assert!(e.is_refinement());
        assert_eq!(e.modification.as_deref(), Some("make it red"));
        assert_eq!(e.strength, Some(0.6));
        assert_eq!(e.parent_id.as_ref(), Some(&parent.id));
    }

    #[test]
    fn add_generation_repoints_current() {
        let mut state = SessionState::create_new();
        assert!(state.current_generation_id.is_none());

        for i in 0..5 {
            let e = entry(&format!("prompt {i}"));
            let id = e.id.clone();
            state.add_generation(e);
            assert_eq!(state.current_generation_id.as_ref(), Some(&id));
            assert_eq!(state.generation_count(), i + 1);
        }
    }

    #[test]
    fn current_generation_looks_up_by_id() {
        let mut state = SessionState::create_new();
        let first = entry("first");
        let second = entry("second");
        state.add_generation(first);
        state.add_generation(second.clone());

        let current = state.current_generation().unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.prompt, "second");
    }

    #[test]
    fn current_generation_none_for_dangling_pointer() {
        let mut state = SessionState::create_new();
        state.current_generation_id = Some(GenerationId::from_raw("gen_missing"));
        assert!(state.current_generation().is_none());
    }

    #[test]
    fn clear_resets_pointer_and_sequence() {
        let mut state = SessionState::create_new();
        state.add_generation(entry("one"));
        state.add_generation(entry("two"));

        state.clear();
        assert!(state.current_generation_id.is_none());
        assert_eq!(state.generation_count(), 0);
    }

    #[test]
    fn state_serde_roundtrip_is_lossless() {
        let mut state = SessionState::create_new();
        state.add_generation(entry("one"));
        let refined = GenerationEntry::refinement(
            EntryParams {
                id: GenerationId::new(),
                prompt: "one, with a tree".into(),
                seed: 7,
                steps: 20,
                guidance_scale: 4.0,
                image_ref: "img2.png".into(),
                width: 512,
                height: 512,
                generation_time: Some(3.2),
            },
            "add a tree".into(),
            0.5,
            state.current_generation_id.clone().unwrap(),
        );
        state.add_generation(refined);

        let json = serde_json::to_string(&state).unwrap();
        let parsed: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn optional_fields_absent_from_new_entry_json() {
        let json = serde_json::to_value(entry("a cat")).unwrap();
        assert!(json.get("modification").is_none());
        assert!(json.get("strength").is_none());
        assert!(json.get("parent_id").is_none());
        assert_eq!(json["kind"], "new");
    }

    #[test]
    fn empty_state_roundtrip() {
        let state = SessionState::create_new();
        let json = serde_json::to_string(&state).unwrap();
        let parsed: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, state.session_id);
        assert_eq!(parsed.generation_count(), 0);
        assert!(parsed.current_generation_id.is_none());
    }
}
