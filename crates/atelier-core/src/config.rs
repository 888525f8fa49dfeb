use serde::{Deserialize, Serialize};

/// Parameters for one synthesis call. Ephemeral — never persisted as-is;
/// validated at the transport boundary, not here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
    /// How far a refinement may diverge from its source image. Ignored for
    /// new generations.
    pub strength: f32,
    /// Explicit seed override. None means: engine-random for a new
    /// generation, current entry's seed for a refinement.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            steps: 28,
            guidance_scale: 3.5,
            width: 1024,
            height: 1024,
            strength: 0.6,
            seed: None,
        }
    }
}
