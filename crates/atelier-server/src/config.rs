use std::path::PathBuf;

use atelier_core::config::GenerationConfig;

/// Application configuration: paths, server settings, generation defaults,
/// and the limit ranges that drive boundary validation.
///
/// Loaded from `ATELIER_*` environment variables; anything unset or
/// unparseable falls back to the default.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub engine_url: String,

    pub default_steps: u32,
    pub default_guidance_scale: f32,
    pub default_strength: f32,
    pub default_width: u32,
    pub default_height: u32,

    pub min_steps: u32,
    pub max_steps: u32,
    pub min_guidance_scale: f32,
    pub max_guidance_scale: f32,
    pub min_strength: f32,
    pub max_strength: f32,
    pub min_dimension: u32,
    pub max_dimension: u32,
    pub dimension_multiple: u32,
    pub max_prompt_length: usize,

    pub enable_thumbnails: bool,
    pub thumbnail_size: u32,
    pub max_send_queue: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            data_dir: PathBuf::from("./outputs"),
            engine_url: "http://127.0.0.1:7860".into(),

            default_steps: 28,
            default_guidance_scale: 3.5,
            default_strength: 0.6,
            default_width: 1024,
            default_height: 1024,

            min_steps: 10,
            max_steps: 100,
            min_guidance_scale: 1.0,
            max_guidance_scale: 5.0,
            min_strength: 0.1,
            max_strength: 1.0,
            min_dimension: 256,
            max_dimension: 2048,
            dimension_multiple: 8,
            max_prompt_length: 500,

            enable_thumbnails: true,
            thumbnail_size: 120,
            max_send_queue: 256,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.port = env_parse("ATELIER_PORT", config.port);
        if let Ok(dir) = std::env::var("ATELIER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("ATELIER_ENGINE_URL") {
            config.engine_url = url;
        }
        config.default_steps = env_parse("ATELIER_DEFAULT_STEPS", config.default_steps);
        config.default_guidance_scale =
            env_parse("ATELIER_DEFAULT_GUIDANCE", config.default_guidance_scale);
        config.default_strength = env_parse("ATELIER_DEFAULT_STRENGTH", config.default_strength);
        config.default_width = env_parse("ATELIER_DEFAULT_WIDTH", config.default_width);
        config.default_height = env_parse("ATELIER_DEFAULT_HEIGHT", config.default_height);
        config.enable_thumbnails = env_parse("ATELIER_THUMBNAILS", config.enable_thumbnails);
        config
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Generation defaults used when a request omits parameters.
    pub fn default_generation(&self) -> GenerationConfig {
        GenerationConfig {
            steps: self.default_steps,
            guidance_scale: self.default_guidance_scale,
            width: self.default_width,
            height: self.default_height,
            strength: self.default_strength,
            seed: None,
        }
    }

    pub fn validate_prompt(&self, prompt: &str) -> Result<(), String> {
        if prompt.trim().is_empty() {
            return Err("prompt must not be empty".into());
        }
        if prompt.len() > self.max_prompt_length {
            return Err(format!(
                "prompt exceeds {} characters",
                self.max_prompt_length
            ));
        }
        Ok(())
    }

    /// Range-check a generation config before it reaches the orchestrator.
    pub fn validate_generation(&self, config: &GenerationConfig) -> Result<(), String> {
        if config.steps < self.min_steps || config.steps > self.max_steps {
            return Err(format!(
                "steps must be between {} and {}",
                self.min_steps, self.max_steps
            ));
        }
        if config.guidance_scale < self.min_guidance_scale
            || config.guidance_scale > self.max_guidance_scale
        {
            return Err(format!(
                "guidance_scale must be between {} and {}",
                self.min_guidance_scale, self.max_guidance_scale
            ));
        }
        if config.strength < self.min_strength || config.strength > self.max_strength {
            return Err(format!(
                "strength must be between {} and {}",
                self.min_strength, self.max_strength
            ));
        }
        for (name, value) in [("width", config.width), ("height", config.height)] {
            if value < self.min_dimension || value > self.max_dimension {
                return Err(format!(
                    "{name} must be between {} and {}",
                    self.min_dimension, self.max_dimension
                ));
            }
            if value % self.dimension_multiple != 0 {
                return Err(format!(
                    "{name} must be a multiple of {}",
                    self.dimension_multiple
                ));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
