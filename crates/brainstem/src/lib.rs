//! # Brainstem: The Controller
//!
//! Owns the single inference capability handle, decides which commands are
//! legal in the current [`LifecycleState`], and fans progress out to any
//! number of subscribers through the [`ProgressBus`].
//!
//! Only one of loading or generating can be in flight at a time. A second
//! command issued meanwhile is rejected straight away with
//! [`DreamError::InvalidState`]; nothing is queued.
//!
//! [`LifecycleState`]: rusty_dreams_core::protocol::LifecycleState
//! [`DreamError::InvalidState`]: rusty_dreams_core::DreamError::InvalidState

pub mod controller;
pub mod progress;

pub use controller::LifecycleController;
pub use progress::{ProgressBus, SubscriptionId};
