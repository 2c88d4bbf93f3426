//! Random identifiers for the federation flow.
//!
//! All values come from the operating system's CSPRNG and are hex encoded,
//! so they are safe in XML attributes and URL query strings alike.

use rand::{rngs::OsRng, RngCore};

/// Entropy behind a protocol message `ID`.
pub const REQUEST_ID_BYTES: usize = 20;

/// Entropy behind a relay state value.
pub const RELAY_STATE_BYTES: usize = 16;

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generates a protocol message identifier.
///
/// XML `ID` attributes must not start with a digit, so the hex body is
/// prefixed with `id-`.
pub fn generate_request_id() -> String {
    format!("id-{}", random_hex(REQUEST_ID_BYTES))
}

/// Generates an opaque relay state for correlating an IdP round trip.
pub fn generate_relay_state() -> String {
    random_hex(RELAY_STATE_BYTES)
}
