//! # Atlas: The Catalog
//!
//! **Static lookup of the diffusion models rusty-dreams knows about.**
//!
//! The catalog ships with a built-in `models.toml` covering the Stable
//! Diffusion 1.5/2.1/XL families and their Turbo variants. Users can add or
//! override entries by dropping a `manifest.toml` into the config directory
//! (`$DREAMS_HOME`, `$RUSTY_DREAMS_CONFIG_DIR`, or `~/.config/rusty-dreams`).
//!
//! Once built, a [`ModelCatalog`] never changes.
//!
//! ```no_run
//! use rusty_dreams_atlas::ModelCatalog;
//!
//! fn main() -> anyhow::Result<()> {
//!     let catalog = ModelCatalog::load()?;
//!     for model in catalog.list() {
//!         println!("{} ({}x{})", model.id, model.resolution.width, model.resolution.height);
//!     }
//!     Ok(())
//! }
//! ```

/// Descriptor table and manifest loading.
pub mod catalog;

pub use catalog::{config_dir, ModelCatalog, DEFAULT_MODEL_ID};
