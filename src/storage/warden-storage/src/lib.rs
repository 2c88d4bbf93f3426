//! # Warden Storage
//!
//! Storage abstraction layer for Warden backends.
//!
//! The gateway reads employee identities and their scope grants, and keeps a
//! deny-list of revoked bearer-token fingerprints. Schema ownership for the
//! identity tables lies outside the gateway; backends only query them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod model;

pub use backend::{IdentityStore, RevocationStore};
pub use error::StorageError;
pub use model::Employee;
