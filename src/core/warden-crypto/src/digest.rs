//! Token fingerprints.

use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 digest of `value`.
///
/// Revocation records key on this fingerprint so raw bearer tokens are
/// never written to storage.
pub fn fingerprint(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_known_vector() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_differs_per_input() {
        assert_ne!(fingerprint("token-a"), fingerprint("token-b"));
        assert_eq!(fingerprint("token-a").len(), 64);
    }
}
