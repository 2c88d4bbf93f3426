//! # Warden Crypto
//!
//! Small cryptographic helpers shared by the Warden crates:
//! - CSPRNG-backed identifiers for federation correlation ids and relay states
//! - SHA-256 fingerprints used to deny-list bearer tokens without storing them

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod digest;
pub mod random;

pub use digest::fingerprint;
pub use random::{generate_relay_state, generate_request_id};
