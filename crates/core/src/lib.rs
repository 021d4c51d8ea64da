//! Core types shared across the rusty-dreams crates.
//!
//! Nothing here performs I/O: the model descriptors, generation requests,
//! progress protocol and the lifecycle state snapshot are plain data, and
//! [`DreamError`] is the single error taxonomy every other crate reports in.

pub mod error;
pub mod manifest;
pub mod protocol;
pub mod request;

pub use error::DreamError;
