//! Identity provider metadata parsing and service provider metadata output.

use std::path::Path;

use tracing::info;
use url::Url;

use crate::{
    config::FederationConfig,
    error::ProtocolError,
    request::Binding,
    xml::{escape, DSIG_NS, METADATA_NS, NAMEID_TRANSIENT, PROTOCOL_NS},
};

/// What the gateway needs to know about the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpMetadata {
    /// Identity provider entity id; expected as the assertion issuer.
    pub entity_id: String,
    /// SSO endpoint for the HTTP-Redirect binding.
    pub sso_redirect_location: Option<String>,
    /// SLO endpoint for the HTTP-Redirect binding.
    pub slo_redirect_location: Option<String>,
    /// Base64 DER signing certificates.
    pub signing_certificates: Vec<String>,
}

impl IdpMetadata {
    /// Parses an `EntityDescriptor` (or the first IdP inside an
    /// `EntitiesDescriptor`).
    pub fn parse(xml: &str) -> Result<Self, ProtocolError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| ProtocolError::Metadata(format!("unparseable metadata: {e}")))?;

        let (entity, idp) = doc
            .descendants()
            .filter(|n| n.has_tag_name((METADATA_NS, "EntityDescriptor")))
            .find_map(|entity| {
                entity
                    .children()
                    .find(|n| n.has_tag_name((METADATA_NS, "IDPSSODescriptor")))
                    .map(|idp| (entity, idp))
            })
            .ok_or_else(|| ProtocolError::Metadata("no IDPSSODescriptor found".into()))?;

        let entity_id = entity
            .attribute("entityID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProtocolError::Metadata("EntityDescriptor has no entityID".into()))?
            .to_string();

        let location = |service: &str| {
            idp.children()
                .filter(|n| n.has_tag_name((METADATA_NS, service)))
                .find(|n| n.attribute("Binding") == Some(Binding::HttpRedirect.uri()))
                .and_then(|n| n.attribute("Location"))
                .map(str::to_string)
        };

        let signing_certificates = idp
            .children()
            .filter(|n| n.has_tag_name((METADATA_NS, "KeyDescriptor")))
            .filter(|n| matches!(n.attribute("use"), None | Some("signing")))
            .flat_map(|n| n.descendants())
            .filter(|n| n.has_tag_name((DSIG_NS, "X509Certificate")))
            .filter_map(|n| n.text())
            .map(|text| text.split_whitespace().collect::<String>())
            .filter(|cert| !cert.is_empty())
            .collect();

        Ok(Self {
            entity_id,
            sso_redirect_location: location("SingleSignOnService"),
            slo_redirect_location: location("SingleLogoutService"),
            signing_certificates,
        })
    }

    /// Downloads and parses metadata.
    pub async fn fetch(client: &reqwest::Client, url: &Url) -> Result<Self, ProtocolError> {
        info!(url = %url, "Fetching IdP metadata");
        let body = client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProtocolError::Metadata(format!("fetch {url}: {e}")))?
            .text()
            .await
            .map_err(|e| ProtocolError::Metadata(format!("read {url}: {e}")))?;
        Self::parse(&body)
    }

    /// Reads and parses metadata from disk.
    pub async fn load(path: &Path) -> Result<Self, ProtocolError> {
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProtocolError::Metadata(format!("read {}: {e}", path.display())))?;
        Self::parse(&body)
    }

    /// Resolves metadata from the configured URL or path, URL first.
    pub async fn resolve(
        client: &reqwest::Client,
        config: &FederationConfig,
    ) -> Result<Self, ProtocolError> {
        match (&config.idp_metadata_url, &config.idp_metadata_path) {
            (Some(url), _) => Self::fetch(client, url).await,
            (None, Some(path)) => Self::load(path).await,
            (None, None) => Err(ProtocolError::Configuration(
                "one of idp_metadata_url or idp_metadata_path is required".into(),
            )),
        }
    }

    /// SSO endpoint for redirect-bound requests.
    pub fn sso_location(&self) -> Result<&str, ProtocolError> {
        self.sso_redirect_location
            .as_deref()
            .ok_or_else(|| ProtocolError::Metadata("IdP SSO URL not configured".into()))
    }
}

/// Renders this gateway's `EntityDescriptor`.
#[derive(Debug, Clone)]
pub struct ServiceProviderMetadata {
    entity_id: String,
    acs_url: Url,
    slo_url: Url,
    certificate: Option<String>,
}

impl ServiceProviderMetadata {
    /// Builds metadata from configuration and an optional PEM certificate.
    pub fn new(
        config: &FederationConfig,
        certificate_pem: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            entity_id: config.entity_id.clone(),
            acs_url: config.acs_url()?,
            slo_url: config.slo_url()?,
            certificate: certificate_pem.map(pem_body).filter(|body| !body.is_empty()),
        })
    }

    /// Serialized XML document.
    pub fn to_xml(&self) -> String {
        let key_descriptor = self
            .certificate
            .as_deref()
            .map(|cert| {
                format!(
                    r#"<md:KeyDescriptor use="signing"><ds:KeyInfo xmlns:ds="{DSIG_NS}"><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>"#
                )
            })
            .unwrap_or_default();

        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<md:EntityDescriptor xmlns:md="{md}" entityID="{entity_id}">"#,
                r#"<md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="{protocol}">"#,
                "{key_descriptor}",
                r#"<md:SingleLogoutService Binding="{redirect}" Location="{slo}"/>"#,
                "<md:NameIDFormat>{nameid}</md:NameIDFormat>",
                r#"<md:AssertionConsumerService Binding="{post}" Location="{acs}" index="1"/>"#,
                "</md:SPSSODescriptor>",
                "</md:EntityDescriptor>"
            ),
            md = METADATA_NS,
            entity_id = escape(&self.entity_id),
            protocol = PROTOCOL_NS,
            key_descriptor = key_descriptor,
            redirect = Binding::HttpRedirect.uri(),
            slo = escape(self.slo_url.as_str()),
            nameid = NAMEID_TRANSIENT,
            post = Binding::HttpPost.uri(),
            acs = escape(self.acs_url.as_str()),
        )
    }
}

/// Base64 body of the first PEM block, whitespace removed.
fn pem_body(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("-----BEGIN"))
        .skip(1)
        .take_while(|line| !line.starts_with("-----END"))
        .collect()
}
