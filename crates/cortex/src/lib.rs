use anyhow::Result;
use async_trait::async_trait;
use rusty_dreams_core::manifest::ModelDescriptor;
use rusty_dreams_core::protocol::ProgressEvent;
use rusty_dreams_core::request::{GenerationJob, ModelHandle, RawImage};

pub mod backend;
pub mod probe;

pub use backend::{create_capability, Daydream, DaydreamConfig};
pub use probe::{
    AdapterInfo, AdapterLookup, AdapterSource, CapabilityProbe, CapabilityReport, HostAdapterSource,
};

/// Progress callback handed to the capability for the duration of one call.
pub type ProgressFn<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

/// The component that actually downloads weights and runs diffusion.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    /// Make `model` ready for generation. May report progress any number of
    /// times before resolving, with non-decreasing percent per phase.
    async fn acquire(&self, model: &ModelDescriptor, on_progress: &ProgressFn)
        -> Result<ModelHandle>;

    /// Run one generation. Never called concurrently for the same handle.
    async fn generate(
        &self,
        handle: ModelHandle,
        job: &GenerationJob,
        on_progress: &ProgressFn,
    ) -> Result<RawImage>;

    /// Free whatever `handle` holds. Idempotent.
    async fn release(&self, handle: ModelHandle) -> Result<()>;
}
