//! The JSON-RPC API of the keychain service.
//!
//! A thin adapter surface: the trait mirrors the engine's in-process API
//! one-to-one and the types here only shape requests and error codes for the
//! wire. No keychain logic lives in this crate.

pub mod traits;
pub mod types;
