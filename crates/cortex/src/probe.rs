//! One-shot check for a usable GPU adapter.
//!
//! The probe never fails: whatever goes wrong while asking the host is folded
//! into an unsupported [`CapabilityReport`] with a diagnostic. Nothing is
//! cached, each call asks again.

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use rusty_dreams_core::DreamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

/// Overrides host detection. `none` forces an unsupported report; any
/// other value is taken as the adapter description.
pub const ACCELERATOR_ENV: &str = "DREAMS_ACCELERATOR";

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub architecture: String,
    pub description: String,
    pub device: String,
    pub vendor: String,
}

impl Default for AdapterInfo {
    fn default() -> Self {
        Self {
            architecture: UNKNOWN.to_string(),
            description: "Unknown GPU".to_string(),
            device: UNKNOWN.to_string(),
            vendor: UNKNOWN.to_string(),
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (vendor: {}, device: {}, architecture: {})",
            self.description, self.vendor, self.device, self.architecture
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub supported: bool,
    pub diagnostic: String,
    pub adapter_info: Option<AdapterInfo>,
}

impl CapabilityReport {
    fn unsupported(diagnostic: impl Into<String>) -> Self {
        Self {
            supported: false,
            diagnostic: diagnostic.into(),
            adapter_info: None,
        }
    }

    /// Turn an unsupported report into `CapabilityUnsupported`.
    pub fn require(&self) -> Result<&Self, DreamError> {
        if self.supported {
            Ok(self)
        } else {
            Err(DreamError::CapabilityUnsupported(self.diagnostic.clone()))
        }
    }
}

/// What the host said when asked for an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterLookup {
    /// No acceleration API at all
    ApiMissing(String),
    /// API present, no compatible adapter
    NoAdapter,
    Adapter(AdapterInfo),
}

#[async_trait]
pub trait AdapterSource: Send + Sync {
    async fn request_adapter(&self) -> Result<AdapterLookup>;
}

pub struct CapabilityProbe<S = HostAdapterSource> {
    source: S,
}

impl CapabilityProbe<HostAdapterSource> {
    pub fn new() -> Self {
        Self {
            source: HostAdapterSource::new(),
        }
    }
}

impl Default for CapabilityProbe<HostAdapterSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AdapterSource> CapabilityProbe<S> {
    pub fn with_source(source: S) -> Self {
        Self { source }
    }

    pub async fn probe(&self) -> CapabilityReport {
        let lookup = AssertUnwindSafe(self.source.request_adapter())
            .catch_unwind()
            .await;

        let report = match lookup {
            Ok(Ok(AdapterLookup::Adapter(info))) => CapabilityReport {
                supported: true,
                diagnostic: "GPU acceleration is supported and ready to use!".to_string(),
                adapter_info: Some(info),
            },
            Ok(Ok(AdapterLookup::NoAdapter)) => CapabilityReport::unsupported(
                "GPU acceleration is available but no compatible adapter was found.",
            ),
            Ok(Ok(AdapterLookup::ApiMissing(reason))) => CapabilityReport::unsupported(format!(
                "GPU acceleration is not supported on this host: {}",
                reason
            )),
            Ok(Err(e)) => {
                CapabilityReport::unsupported(format!("GPU capability check failed: {:#}", e))
            }
            Err(_) => CapabilityReport::unsupported("GPU capability check panicked"),
        };

        if report.supported {
            log::info!("Capability probe: {}", report.diagnostic);
        } else {
            log::warn!("Capability probe: {}", report.diagnostic);
        }
        report
    }
}

/// Looks at the running host: Metal on macOS, DRM render nodes or NVIDIA
/// device nodes on Linux.
pub struct HostAdapterSource {
    root: PathBuf,
    env_override: Option<String>,
}

impl HostAdapterSource {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
            env_override: std::env::var(ACCELERATOR_ENV).ok(),
        }
    }

    /// Resolve `/dev` and `/sys` below `root` instead of `/`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            env_override: None,
        }
    }
}

impl Default for HostAdapterSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdapterSource for HostAdapterSource {
    async fn request_adapter(&self) -> Result<AdapterLookup> {
        if let Some(value) = &self.env_override {
            if value.eq_ignore_ascii_case("none") {
                return Ok(AdapterLookup::ApiMissing(format!(
                    "disabled via {}",
                    ACCELERATOR_ENV
                )));
            }
            return Ok(AdapterLookup::Adapter(AdapterInfo {
                description: value.clone(),
                ..Default::default()
            }));
        }

        let root = self.root.clone();
        async_std::task::spawn_blocking(move || host_lookup(&root)).await
    }
}

#[cfg(target_os = "macos")]
fn host_lookup(_root: &Path) -> Result<AdapterLookup> {
    Ok(AdapterLookup::Adapter(AdapterInfo {
        architecture: std::env::consts::ARCH.to_string(),
        description: "Apple Metal".to_string(),
        device: UNKNOWN.to_string(),
        vendor: "Apple".to_string(),
    }))
}

#[cfg(target_os = "linux")]
fn host_lookup(root: &Path) -> Result<AdapterLookup> {
    linux::lookup(root)
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn host_lookup(_root: &Path) -> Result<AdapterLookup> {
    Ok(AdapterLookup::ApiMissing(format!(
        "no supported acceleration backend for {}",
        std::env::consts::OS
    )))
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{AdapterInfo, AdapterLookup, UNKNOWN};
    use anyhow::{Context, Result};
    use std::fs;
    use std::path::Path;

    pub(super) fn lookup(root: &Path) -> Result<AdapterLookup> {
        let dri = root.join("dev/dri");
        if dri.is_dir() {
            let mut nodes = Vec::new();
            for entry in fs::read_dir(&dri).with_context(|| format!("listing {}", dri.display()))? {
                let name = entry?.file_name().to_string_lossy().to_string();
                if name.starts_with("renderD") {
                    nodes.push(name);
                }
            }
            nodes.sort();
            if let Some(node) = nodes.first() {
                return Ok(AdapterLookup::Adapter(describe_node(root, node)));
            }
        }

        if root.join("dev/nvidia0").exists() {
            return Ok(AdapterLookup::Adapter(AdapterInfo {
                description: "NVIDIA GPU".to_string(),
                vendor: "NVIDIA".to_string(),
                ..Default::default()
            }));
        }

        if dri.is_dir() {
            Ok(AdapterLookup::NoAdapter)
        } else {
            Ok(AdapterLookup::ApiMissing(
                "no DRM render nodes found".to_string(),
            ))
        }
    }

    fn describe_node(root: &Path, node: &str) -> AdapterInfo {
        let device_dir = root.join("sys/class/drm").join(node).join("device");
        let read = |file: &str| {
            fs::read_to_string(device_dir.join(file))
                .map(|s| s.trim().to_string())
                .ok()
                .filter(|s| !s.is_empty())
        };

        let vendor_id = read("vendor");
        let vendor = match vendor_id.as_deref() {
            Some("0x10de") => "NVIDIA",
            Some("0x1002") => "AMD",
            Some("0x8086") => "Intel",
            Some("0x106b") => "Apple",
            _ => UNKNOWN,
        };
        let driver = fs::read_link(device_dir.join("driver"))
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()));

        AdapterInfo {
            architecture: driver.unwrap_or_else(|| UNKNOWN.to_string()),
            description: format!("{} GPU ({})", vendor, node),
            device: read("device").unwrap_or_else(|| UNKNOWN.to_string()),
            vendor: vendor.to_string(),
        }
    }
}
