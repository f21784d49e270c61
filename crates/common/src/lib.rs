//! Reusable utilities for the keychain binaries: initializing the tracing
//! framework and whatever else every service needs at startup.

pub mod logging;

// Re-export tracing crate for convenience.
pub use tracing;
