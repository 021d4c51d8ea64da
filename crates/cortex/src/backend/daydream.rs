//! Simulated diffusion backend.
//!
//! Daydream walks through the same stages a real backend reports (download,
//! component loading, denoising steps) with configurable delays and paints a
//! gradient instead of running a UNet. The handle bookkeeping is real, so the
//! controller sees the same contract it would with a GPU backend.

use crate::{InferenceCapability, ProgressFn};
use anyhow::{anyhow, Result};
use async_std::task;
use async_trait::async_trait;
use rusty_dreams_core::manifest::ModelDescriptor;
use rusty_dreams_core::protocol::{ProgressEvent, ProgressPhase};
use rusty_dreams_core::request::{GenerationJob, ModelHandle, RawImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const LOAD_STAGES: [(u8, &str); 5] = [
    (20, "Downloading model weights..."),
    (40, "Loading text encoder..."),
    (60, "Loading VAE..."),
    (80, "Loading UNet..."),
    (95, "Initializing GPU pipeline..."),
];

const GRADIENT_START: [u8; 3] = [0x66, 0x7e, 0xea];
const GRADIENT_END: [u8; 3] = [0x76, 0x4b, 0xa2];

#[derive(Debug, Clone)]
pub struct DaydreamConfig {
    /// Pause after each load stage
    pub stage_delay: Duration,
    /// Pause per denoising step
    pub step_delay: Duration,
}

impl Default for DaydreamConfig {
    fn default() -> Self {
        Self {
            stage_delay: Duration::from_millis(500),
            step_delay: Duration::from_millis(100),
        }
    }
}

impl DaydreamConfig {
    /// No delays at all, for tests
    pub fn instant() -> Self {
        Self {
            stage_delay: Duration::ZERO,
            step_delay: Duration::ZERO,
        }
    }
}

struct Loaded {
    model_id: String,
    busy: bool,
}

pub struct Daydream {
    config: DaydreamConfig,
    next_handle: AtomicU64,
    loaded: Mutex<HashMap<ModelHandle, Loaded>>,
}

impl Daydream {
    pub fn new(config: DaydreamConfig) -> Self {
        Self {
            config,
            next_handle: AtomicU64::new(1),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Number of handles acquired and not yet released
    pub fn live_handles(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ModelHandle, Loaded>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_busy(&self, handle: ModelHandle) -> Result<()> {
        let mut loaded = self.lock();
        let entry = loaded
            .get_mut(&handle)
            .ok_or_else(|| anyhow!("Daydream Error: handle {} is not loaded", handle.id()))?;
        if entry.busy {
            return Err(anyhow!(
                "Daydream Error: '{}' is already generating",
                entry.model_id
            ));
        }
        entry.busy = true;
        Ok(())
    }

    fn mark_idle(&self, handle: ModelHandle) {
        if let Some(entry) = self.lock().get_mut(&handle) {
            entry.busy = false;
        }
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            task::sleep(delay).await;
        }
    }
}

#[async_trait]
impl InferenceCapability for Daydream {
    async fn acquire(
        &self,
        model: &ModelDescriptor,
        on_progress: &ProgressFn,
    ) -> Result<ModelHandle> {
        log::debug!("Daydream acquiring '{}'", model.id);
        on_progress(ProgressEvent::new(
            ProgressPhase::Downloading,
            10,
            "Downloading model files...",
        ));
        for (percent, message) in LOAD_STAGES {
            Self::pause(self.config.stage_delay).await;
            on_progress(ProgressEvent::new(ProgressPhase::Loading, percent, message));
        }

        let handle = ModelHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            handle,
            Loaded {
                model_id: model.id.clone(),
                busy: false,
            },
        );
        Ok(handle)
    }

    async fn generate(
        &self,
        handle: ModelHandle,
        job: &GenerationJob,
        on_progress: &ProgressFn,
    ) -> Result<RawImage> {
        if job.steps == 0 {
            return Err(anyhow!("Daydream Error: zero denoising steps"));
        }
        self.mark_busy(handle)?;

        for step in 0..=job.steps {
            Self::pause(self.config.step_delay).await;
            let percent = (step * 100 / job.steps) as u8;
            on_progress(ProgressEvent::new(
                ProgressPhase::Generating,
                percent,
                format!("Step {}/{}", step, job.steps),
            ));
        }

        let image = paint(job.width, job.height, job.seed);
        self.mark_idle(handle);
        Ok(image)
    }

    async fn release(&self, handle: ModelHandle) -> Result<()> {
        if let Some(entry) = self.lock().remove(&handle) {
            log::debug!("Daydream released '{}'", entry.model_id);
        }
        Ok(())
    }
}

/// Diagonal gradient, tinted by the seed so different seeds differ.
fn paint(width: u32, height: u32, seed: u64) -> RawImage {
    let tint = (seed % 48) as i16 - 24;
    let span = (width + height).saturating_sub(2).max(1) as u64;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let t = (x + y) as u64;
            for channel in 0..3 {
                let start = GRADIENT_START[channel] as u64;
                let end = GRADIENT_END[channel] as u64;
                let value = (start * (span - t) + end * t) / span;
                let shift = if channel == 0 { tint } else { -tint / 2 };
                pixels.push((value as i16 + shift).clamp(0, 255) as u8);
            }
            pixels.push(u8::MAX);
        }
    }
    RawImage {
        width,
        height,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paint_fills_every_pixel() {
        let image = paint(16, 8, 3);
        assert!(image.is_well_formed());
        assert_eq!(&image.pixels[3..4], &[255]);
    }

    #[test]
    fn paint_is_deterministic_per_seed() {
        assert_eq!(paint(8, 8, 11), paint(8, 8, 11));
        assert_ne!(paint(8, 8, 11), paint(8, 8, 12));
    }

    #[test]
    fn single_pixel_does_not_divide_by_zero() {
        let image = paint(1, 1, 0);
        assert_eq!(image.pixels.len(), 4);
    }
}
