use crate::error::DreamError;
use crate::manifest::ModelDescriptor;
use serde::{Deserialize, Serialize};

pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 100;
pub const MIN_GUIDANCE_SCALE: f32 = 0.0;
pub const MAX_GUIDANCE_SCALE: f32 = 20.0;
pub const MAX_PROMPT_LENGTH: usize = 500;
pub const MAX_NEGATIVE_PROMPT_LENGTH: usize = 500;

/// Seed value asking the controller to pick one at random
pub const RANDOM_SEED: i64 = -1;

fn random_seed() -> i64 {
    RANDOM_SEED
}

/// What the caller asks for. Anything left as `None` falls back to the
/// loaded model's defaults; the output size always comes from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default = "random_seed")]
    pub seed: i64,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            steps: None,
            guidance_scale: None,
            seed: RANDOM_SEED,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_guidance_scale(mut self, guidance_scale: f32) -> Self {
        self.guidance_scale = Some(guidance_scale);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), DreamError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(DreamError::InvalidRequest("prompt is empty".to_string()));
        }
        if prompt.chars().count() > MAX_PROMPT_LENGTH {
            return Err(DreamError::InvalidRequest(format!(
                "prompt exceeds {} characters",
                MAX_PROMPT_LENGTH
            )));
        }
        if let Some(negative) = &self.negative_prompt {
            if negative.chars().count() > MAX_NEGATIVE_PROMPT_LENGTH {
                return Err(DreamError::InvalidRequest(format!(
                    "negative prompt exceeds {} characters",
                    MAX_NEGATIVE_PROMPT_LENGTH
                )));
            }
        }
        if let Some(steps) = self.steps {
            check_steps(steps)?;
        }
        if let Some(scale) = self.guidance_scale {
            check_guidance_scale(scale)?;
        }
        if self.seed < RANDOM_SEED {
            return Err(DreamError::InvalidRequest(format!(
                "seed must be {} (random) or non-negative, got {}",
                RANDOM_SEED, self.seed
            )));
        }
        Ok(())
    }

    /// The seed as given, or `None` when one should be drawn
    pub fn explicit_seed(&self) -> Option<u64> {
        u64::try_from(self.seed).ok()
    }

    /// Fill in model defaults and fix the seed, producing what the
    /// capability actually runs.
    pub fn resolve(&self, model: &ModelDescriptor, seed: u64) -> GenerationJob {
        GenerationJob {
            model_id: model.id.clone(),
            prompt: self.prompt.trim().to_string(),
            negative_prompt: self
                .negative_prompt
                .clone()
                .unwrap_or_else(|| model.default_negative_prompt.clone()),
            steps: self.steps.unwrap_or(model.default_steps),
            guidance_scale: self.guidance_scale.unwrap_or(model.default_guidance_scale),
            seed,
            width: model.resolution.width,
            height: model.resolution.height,
        }
    }
}

pub fn check_steps(steps: u32) -> Result<(), DreamError> {
    if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
        return Err(DreamError::InvalidRequest(format!(
            "steps must be within {}..={}, got {}",
            MIN_STEPS, MAX_STEPS, steps
        )));
    }
    Ok(())
}

pub fn check_guidance_scale(scale: f32) -> Result<(), DreamError> {
    if !scale.is_finite() || !(MIN_GUIDANCE_SCALE..=MAX_GUIDANCE_SCALE).contains(&scale) {
        return Err(DreamError::InvalidRequest(format!(
            "guidance scale must be within {}..={}, got {}",
            MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE, scale
        )));
    }
    Ok(())
}

/// Fully resolved generation parameters handed to the inference capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub model_id: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
}

/// Opaque token for a model the capability has acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandle(u64);

impl ModelHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Decoded RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawImage {
    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() == self.width as usize * self.height as usize * 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub model_id: String,
    pub image: RawImage,
    /// Seed actually used, concrete even when the request asked for a random one
    pub resolved_seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Resolution;

    fn turbo() -> ModelDescriptor {
        ModelDescriptor {
            id: "sd-turbo".to_string(),
            name: "SD Turbo".to_string(),
            description: String::new(),
            resolution: Resolution {
                width: 512,
                height: 512,
            },
            default_steps: 4,
            default_guidance_scale: 1.0,
            default_negative_prompt: "blurry".to_string(),
            size_gb: 4.0,
            vram_gb: 4.0,
            repo: None,
            estimated_time: None,
        }
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let err = GenerationRequest::new("   ").validate().unwrap_err();
        assert!(matches!(err, DreamError::InvalidRequest(_)));
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        for request in [
            GenerationRequest::new("a cat").with_steps(0),
            GenerationRequest::new("a cat").with_steps(101),
            GenerationRequest::new("a cat").with_guidance_scale(-0.5),
            GenerationRequest::new("a cat").with_guidance_scale(20.5),
            GenerationRequest::new("a cat").with_guidance_scale(f32::NAN),
            GenerationRequest::new("a cat").with_seed(-2),
            GenerationRequest::new("x".repeat(MAX_PROMPT_LENGTH + 1)),
        ] {
            assert!(request.validate().is_err(), "{:?} should be invalid", request);
        }
    }

    #[test]
    fn boundaries_are_accepted() {
        GenerationRequest::new("a cat")
            .with_steps(MIN_STEPS)
            .with_guidance_scale(MIN_GUIDANCE_SCALE)
            .validate()
            .unwrap();
        GenerationRequest::new("a cat")
            .with_steps(MAX_STEPS)
            .with_guidance_scale(MAX_GUIDANCE_SCALE)
            .with_seed(0)
            .validate()
            .unwrap();
    }

    #[test]
    fn resolve_inherits_model_defaults() {
        let job = GenerationRequest::new("  a cat  ").resolve(&turbo(), 42);
        assert_eq!(job.prompt, "a cat");
        assert_eq!(job.steps, 4);
        assert_eq!(job.guidance_scale, 1.0);
        assert_eq!(job.negative_prompt, "blurry");
        assert_eq!((job.width, job.height), (512, 512));
        assert_eq!(job.seed, 42);
    }

    #[test]
    fn resolve_prefers_explicit_values() {
        let job = GenerationRequest::new("a cat")
            .with_steps(8)
            .with_guidance_scale(2.5)
            .with_negative_prompt("")
            .resolve(&turbo(), 7);
        assert_eq!(job.steps, 8);
        assert_eq!(job.guidance_scale, 2.5);
        assert_eq!(job.negative_prompt, "");
    }

    #[test]
    fn explicit_seed_distinguishes_sentinel() {
        assert_eq!(GenerationRequest::new("a").explicit_seed(), None);
        assert_eq!(GenerationRequest::new("a").with_seed(9).explicit_seed(), Some(9));
    }
}
