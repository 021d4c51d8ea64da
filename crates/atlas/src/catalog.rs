use anyhow::{anyhow, Context, Result};
use rusty_dreams_core::manifest::ModelDescriptor;
use rusty_dreams_core::request::{check_guidance_scale, check_steps};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_MODELS: &str = include_str!("models.toml");

pub const DEFAULT_MODEL_ID: &str = "sd-1.5";

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    models: Vec<ModelDescriptor>,
}

/// Resolve the directory holding the user's `manifest.toml`.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("DREAMS_HOME") {
        return Ok(PathBuf::from(home));
    }
    if let Ok(custom_path) = std::env::var("RUSTY_DREAMS_CONFIG_DIR") {
        return Ok(PathBuf::from(custom_path));
    }
    Ok(dirs::config_dir()
        .context("Could not find config directory")?
        .join("rusty-dreams"))
}

/// Never empty: every constructor refuses to build a catalog without models.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
}

impl ModelCatalog {
    /// Only the descriptors compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::empty();
        catalog.load_defaults()?;
        catalog.ensure_not_empty()?;
        Ok(catalog)
    }

    /// Built-in descriptors overlaid with the user's manifest, if any.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?)
    }

    pub fn load_from(config_dir: &Path) -> Result<Self> {
        let mut catalog = Self::builtin()?;
        catalog.load_manifest(config_dir)?;
        Ok(catalog)
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Result<Self> {
        let mut catalog = Self::empty();
        for descriptor in descriptors {
            catalog.insert(descriptor)?;
        }
        catalog.ensure_not_empty()?;
        Ok(catalog)
    }

    fn empty() -> Self {
        Self {
            models: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn ensure_not_empty(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(anyhow!("model catalog has no models"));
        }
        Ok(())
    }

    fn load_defaults(&mut self) -> Result<()> {
        let parsed: CatalogFile =
            toml::from_str(DEFAULT_MODELS).context("built-in models.toml is malformed")?;
        for model in parsed.models {
            self.insert(model)?;
        }
        Ok(())
    }

    fn load_manifest(&mut self, config_dir: &Path) -> Result<()> {
        let manifest_path = config_dir.join("manifest.toml");
        if !manifest_path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&manifest_path)
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let parsed: CatalogFile = toml::from_str(&content)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;
        log::info!(
            "Loaded {} model(s) from {}",
            parsed.models.len(),
            manifest_path.display()
        );
        for model in parsed.models {
            self.insert(model)?;
        }
        Ok(())
    }

    /// Add a descriptor, replacing any existing one with the same id.
    fn insert(&mut self, descriptor: ModelDescriptor) -> Result<()> {
        validate(&descriptor)?;
        match self.index.get(&descriptor.id) {
            Some(&pos) => {
                log::debug!("Overriding model '{}'", descriptor.id);
                self.models[pos] = descriptor;
            }
            None => {
                self.index.insert(descriptor.id.clone(), self.models.len());
                self.models.push(descriptor);
            }
        }
        Ok(())
    }

    pub fn get_descriptor(&self, id: &str) -> Option<&ModelDescriptor> {
        self.index.get(id).map(|&pos| &self.models[pos])
    }

    /// All descriptors in declaration order
    pub fn list(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// `sd-1.5` when present, otherwise the first entry.
    pub fn default_model(&self) -> &ModelDescriptor {
        self.get_descriptor(DEFAULT_MODEL_ID)
            .unwrap_or(&self.models[0])
    }

}

fn validate(descriptor: &ModelDescriptor) -> Result<()> {
    if descriptor.id.trim().is_empty() {
        return Err(anyhow!("model descriptor has an empty id"));
    }
    if descriptor.resolution.width == 0 || descriptor.resolution.height == 0 {
        return Err(anyhow!("model '{}' has a zero resolution", descriptor.id));
    }
    check_steps(descriptor.default_steps)
        .with_context(|| format!("model '{}' default steps", descriptor.id))?;
    check_guidance_scale(descriptor.default_guidance_scale)
        .with_context(|| format!("model '{}' default guidance scale", descriptor.id))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_all_families() {
        let catalog = ModelCatalog::builtin().unwrap();
        let ids: Vec<_> = catalog.list().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["sd-1.5", "sd-2.1", "sdxl", "sd-turbo", "sdxl-turbo"]);
    }

    #[test]
    fn turbo_descriptor_matches_upstream_defaults() {
        let catalog = ModelCatalog::builtin().unwrap();
        let turbo = catalog.get_descriptor("sd-turbo").unwrap();
        assert_eq!(turbo.resolution.width, 512);
        assert_eq!(turbo.default_steps, 4);
        assert_eq!(turbo.default_guidance_scale, 1.0);
        assert!(turbo.default_negative_prompt.is_empty());
        assert_eq!(turbo.repo.as_deref(), Some("stabilityai/sd-turbo"));
    }

    #[test]
    fn unknown_id_is_none() {
        let catalog = ModelCatalog::builtin().unwrap();
        assert!(catalog.get_descriptor("unknown-id").is_none());
    }

    #[test]
    fn default_is_sd_1_5() {
        let catalog = ModelCatalog::builtin().unwrap();
        assert_eq!(catalog.default_model().id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn default_falls_back_to_first_entry() {
        let mut turbo = ModelCatalog::builtin().unwrap().list()[3].clone();
        turbo.id = "my-turbo".to_string();
        let catalog = ModelCatalog::from_descriptors([turbo]).unwrap();
        assert_eq!(catalog.default_model().id, "my-turbo");
    }

    #[test]
    fn empty_catalog_is_refused() {
        assert!(ModelCatalog::from_descriptors(Vec::<ModelDescriptor>::new()).is_err());
    }

    #[test]
    fn invalid_descriptor_is_refused() {
        let mut broken = ModelCatalog::builtin().unwrap().list()[0].clone();
        broken.default_steps = 0;
        assert!(ModelCatalog::from_descriptors([broken]).is_err());
    }
}
