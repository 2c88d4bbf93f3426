//! XML signature verification seam.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::ProtocolError;

/// Verifies the enveloped signature of a SAML response.
///
/// Callers have already checked that every signature in the document sits
/// directly under the `Response` or the `Assertion` and references that
/// element's `ID`.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Succeeds if the document verifies against one of `certificates`
    /// (base64 DER, as found in IdP metadata).
    async fn verify(&self, xml: &str, certificates: &[String]) -> Result<(), ProtocolError>;
}

/// Runs `xmlsec1 --verify` once per candidate certificate.
#[derive(Debug, Clone)]
pub struct Xmlsec1Verifier {
    binary: PathBuf,
}

impl Xmlsec1Verifier {
    /// Uses the given `xmlsec1` executable.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn verify_with(
        &self,
        document: &Path,
        certificate: &Path,
    ) -> Result<bool, ProtocolError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--verify")
            .arg("--enabled-reference-uris")
            .arg("empty,same-doc")
            .arg("--pubkey-cert-pem")
            .arg(certificate)
            .arg("--id-attr:ID")
            .arg("urn:oasis:names:tc:SAML:2.0:protocol:Response")
            .arg("--id-attr:ID")
            .arg("urn:oasis:names:tc:SAML:2.0:assertion:Assertion")
            .arg(document)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProtocolError::Configuration(format!(
                    "cannot run {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "xmlsec1 rejected signature"
            );
        }
        Ok(output.status.success())
    }
}

#[async_trait]
impl SignatureVerifier for Xmlsec1Verifier {
    async fn verify(&self, xml: &str, certificates: &[String]) -> Result<(), ProtocolError> {
        if certificates.is_empty() {
            return Err(ProtocolError::InvalidSignature(
                "IdP metadata lists no signing certificate".into(),
            ));
        }

        let document = scratch_file(xml)?;
        for certificate in certificates {
            let pem = scratch_file(&to_pem(certificate))?;
            if self.verify_with(document.path(), pem.path()).await? {
                return Ok(());
            }
        }

        Err(ProtocolError::InvalidSignature(
            "signature does not verify against any IdP certificate".into(),
        ))
    }
}

/// Accepts every document. Only for development against a test IdP.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsecureSkipVerifier;

#[async_trait]
impl SignatureVerifier for InsecureSkipVerifier {
    async fn verify(&self, _xml: &str, _certificates: &[String]) -> Result<(), ProtocolError> {
        warn!("SAML signature verification is DISABLED; accepting unverified response");
        Ok(())
    }
}

fn scratch_file(contents: &str) -> Result<NamedTempFile, ProtocolError> {
    let mut file = NamedTempFile::new()
        .map_err(|e| ProtocolError::Configuration(format!("cannot create temp file: {e}")))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| ProtocolError::Configuration(format!("cannot write temp file: {e}")))?;
    Ok(file)
}

fn to_pem(der_base64: &str) -> String {
    let body: Vec<&str> = der_base64
        .as_bytes()
        .chunks(64)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        body.join("\n")
    )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_wraps_at_64_columns() {
        let der = "A".repeat(130);
        let pem = to_pem(&der);
        let lines: Vec<_> = pem.lines().collect();

        assert_eq!(lines[0], "-----BEGIN CERTIFICATE-----");
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines[2].len(), 64);
        assert_eq!(lines[3].len(), 2);
        assert_eq!(lines[4], "-----END CERTIFICATE-----");
    }

    #[tokio::test]
    async fn test_no_certificates_is_invalid_signature() {
        let verifier = Xmlsec1Verifier::new("xmlsec1");
        let result = verifier.verify("<a/>", &[]).await;
        assert!(matches!(result, Err(ProtocolError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_configuration_error() {
        let verifier = Xmlsec1Verifier::new("/nonexistent/xmlsec1");
        let result = verifier.verify("<a/>", &["MIIB".to_string()]).await;
        assert!(matches!(result, Err(ProtocolError::Configuration(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_decides() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = |name: &str, code: i32| {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\nexit {code}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let accept = Xmlsec1Verifier::new(script("accept", 0));
        assert!(accept.verify("<a/>", &["MIIB".into()]).await.is_ok());

        let reject = Xmlsec1Verifier::new(script("reject", 1));
        let result = reject.verify("<a/>", &["MIIB".into(), "MIIC".into()]).await;
        assert!(matches!(result, Err(ProtocolError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_insecure_verifier_accepts() {
        assert!(InsecureSkipVerifier.verify("<a/>", &[]).await.is_ok());
    }
}
