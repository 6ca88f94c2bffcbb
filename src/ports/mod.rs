//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the pipeline and external systems (the FHE library, remote
//! compute services).

mod endpoint;
mod he_engine;

pub use endpoint::{ComputeEndpoint, EndpointError};
pub use he_engine::HomomorphicEngine;
