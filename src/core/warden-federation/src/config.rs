//! Service provider settings.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::error::ProtocolError;

fn default_request_ttl_secs() -> u64 {
    90
}

fn default_clock_skew_secs() -> u64 {
    180
}

fn default_xmlsec_binary() -> PathBuf {
    PathBuf::from("xmlsec1")
}

/// Settings for the SAML service provider.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Entity id this service provider announces.
    pub entity_id: String,
    /// Externally visible root URL of the gateway.
    pub base_url: Url,
    /// Where to fetch the identity provider metadata.
    #[serde(default)]
    pub idp_metadata_url: Option<Url>,
    /// Local copy of the identity provider metadata.
    #[serde(default)]
    pub idp_metadata_path: Option<PathBuf>,
    /// PEM certificate published in SP metadata.
    #[serde(default)]
    pub sp_certificate_path: Option<PathBuf>,
    /// How long an issued request may wait for its response.
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: u64,
    /// Tolerated clock difference with the identity provider.
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    /// `xmlsec1` executable used to verify signatures.
    #[serde(default = "default_xmlsec_binary")]
    pub xmlsec_binary: PathBuf,
    /// Accept unsigned or unverifiable responses. Development only.
    #[serde(default)]
    pub insecure_skip_signature_verification: bool,
}

impl FederationConfig {
    /// Creates a configuration with default timings.
    pub fn new(entity_id: impl Into<String>, base_url: Url) -> Self {
        Self {
            entity_id: entity_id.into(),
            base_url,
            idp_metadata_url: None,
            idp_metadata_path: None,
            sp_certificate_path: None,
            request_ttl_secs: default_request_ttl_secs(),
            clock_skew_secs: default_clock_skew_secs(),
            xmlsec_binary: default_xmlsec_binary(),
            insecure_skip_signature_verification: false,
        }
    }

    /// Assertion consumer service URL (`/saml/acs`).
    pub fn acs_url(&self) -> Result<Url, ProtocolError> {
        self.endpoint("saml/acs")
    }

    /// Single logout URL (`/saml/logout`).
    pub fn slo_url(&self) -> Result<Url, ProtocolError> {
        self.endpoint("saml/logout")
    }

    /// SP metadata URL (`/saml/metadata`).
    pub fn metadata_url(&self) -> Result<Url, ProtocolError> {
        self.endpoint("saml/metadata")
    }

    /// Lifetime of a pending request.
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    /// Tolerated clock skew.
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProtocolError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|e| ProtocolError::Configuration(format!("invalid base_url: {e}")))
    }
}
