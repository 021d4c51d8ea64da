mod daydream;

pub use crate::InferenceCapability;
pub use daydream::{Daydream, DaydreamConfig};

use std::sync::Arc;

/// The capability the binaries run with. Daydream is the only backend so far.
pub fn create_capability(config: DaydreamConfig) -> Arc<dyn InferenceCapability> {
    Arc::new(Daydream::new(config))
}
