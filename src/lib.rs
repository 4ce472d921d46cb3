//! Registry Courier - push, inspect, and delete OCI images in remote
//! registries with Kubernetes-scoped credentials.
//!
//! This crate is a thin orchestration layer over the `oci-client` registry
//! collaborator. It adds three things:
//!
//! - Credential resolution from Kubernetes image pull secrets, service
//!   account pull secrets, or ambient sources (one explicit path per call).
//! - Pushing a zip source archive as a single-layer image, returning a
//!   digest-qualified reference.
//! - Best-effort cascading delete: tags pointing at the target digest are
//!   removed first, and deleting an already-absent image succeeds.
//!
//! Each call is linear and self-contained; the client holds no shared
//! mutable state and may be used concurrently. Cancellation propagates by
//! dropping the returned future.

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
mod layer;

pub use client::ImageClient;
pub use config::ImageConfig;
pub use credentials::{Credentials, Keychain};
pub use error::{CourierError, Result};

/// Registry Courier version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
