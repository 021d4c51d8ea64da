use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Static description of a diffusion model the capability knows how to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub resolution: Resolution,
    pub default_steps: u32,
    pub default_guidance_scale: f32,
    #[serde(default)]
    pub default_negative_prompt: String,
    /// Download size in gigabytes
    pub size_gb: f32,
    /// Approximate VRAM needed in gigabytes
    pub vram_gb: f32,
    /// Upstream repository the weights come from (e.g. HuggingFace id)
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<String>,
}

impl ModelDescriptor {
    pub fn size_estimate(&self) -> String {
        format!("{:.1} GB", self.size_gb)
    }

    pub fn vram_estimate(&self) -> String {
        format!("~{}GB", self.vram_gb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_are_human_readable() {
        let descriptor = ModelDescriptor {
            id: "sd-turbo".to_string(),
            name: "SD Turbo".to_string(),
            description: String::new(),
            resolution: Resolution {
                width: 512,
                height: 512,
            },
            default_steps: 4,
            default_guidance_scale: 1.0,
            default_negative_prompt: String::new(),
            size_gb: 4.0,
            vram_gb: 4.0,
            repo: None,
            estimated_time: None,
        };
        assert_eq!(descriptor.size_estimate(), "4.0 GB");
        assert_eq!(descriptor.vram_estimate(), "~4GB");
    }
}
