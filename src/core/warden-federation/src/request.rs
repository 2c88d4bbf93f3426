//! Outbound `AuthnRequest` and `LogoutRequest` messages and the
//! HTTP-Redirect binding encoding.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use url::Url;
use warden_crypto::generate_request_id;

use crate::{
    error::ProtocolError,
    xml::{escape, ASSERTION_NS, INSTANT_FORMAT, NAMEID_TRANSIENT, PROTOCOL_NS},
};

const ENTITY_FORMAT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";

/// SAML protocol bindings used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Query-string transport of deflated messages.
    HttpRedirect,
    /// Auto-submitted HTML form transport.
    HttpPost,
}

impl Binding {
    /// Binding URI as it appears in metadata and requests.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::HttpRedirect => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect",
            Self::HttpPost => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST",
        }
    }
}

/// Authentication request sent to the identity provider.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    /// Correlation id echoed back as `InResponseTo`.
    pub id: String,
    /// Creation time.
    pub issue_instant: DateTime<Utc>,
    /// IdP SSO endpoint.
    pub destination: String,
    /// Where the IdP must post the response.
    pub acs_url: String,
    /// Binding the IdP must use for the response.
    pub response_binding: Binding,
    /// Service provider entity id.
    pub issuer: String,
}

impl AuthnRequest {
    /// New request with a fresh id, asking for an HTTP-POST response.
    pub fn new(
        issuer: impl Into<String>,
        destination: impl Into<String>,
        acs_url: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_request_id(),
            issue_instant: Utc::now(),
            destination: destination.into(),
            acs_url: acs_url.into(),
            response_binding: Binding::HttpPost,
            issuer: issuer.into(),
        }
    }

    /// Serialized `samlp:AuthnRequest`.
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="{protocol}" xmlns:saml="{assertion}" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" "#,
                r#"AssertionConsumerServiceURL="{acs}" ProtocolBinding="{binding}">"#,
                r#"<saml:Issuer Format="{entity_format}">{issuer}</saml:Issuer>"#,
                r#"<samlp:NameIDPolicy Format="{transient}" AllowCreate="true"/>"#,
                "</samlp:AuthnRequest>"
            ),
            protocol = PROTOCOL_NS,
            assertion = ASSERTION_NS,
            id = escape(&self.id),
            instant = self.issue_instant.format(INSTANT_FORMAT),
            destination = escape(&self.destination),
            acs = escape(&self.acs_url),
            binding = self.response_binding.uri(),
            entity_format = ENTITY_FORMAT,
            issuer = escape(&self.issuer),
            transient = NAMEID_TRANSIENT,
        )
    }
}

/// Single-logout request sent to the identity provider.
#[derive(Debug, Clone)]
pub struct LogoutRequest {
    /// Request id.
    pub id: String,
    /// Creation time.
    pub issue_instant: DateTime<Utc>,
    /// IdP SLO endpoint.
    pub destination: String,
    /// Service provider entity id.
    pub issuer: String,
    /// Subject being logged out.
    pub name_id: String,
    /// IdP session being terminated, when known.
    pub session_index: Option<String>,
}

impl LogoutRequest {
    /// New request with a fresh id.
    pub fn new(
        issuer: impl Into<String>,
        destination: impl Into<String>,
        name_id: impl Into<String>,
        session_index: Option<String>,
    ) -> Self {
        Self {
            id: generate_request_id(),
            issue_instant: Utc::now(),
            destination: destination.into(),
            issuer: issuer.into(),
            name_id: name_id.into(),
            session_index,
        }
    }

    /// Serialized `samlp:LogoutRequest`.
    pub fn to_xml(&self) -> String {
        let session_index = self
            .session_index
            .as_deref()
            .map(|index| format!("<samlp:SessionIndex>{}</samlp:SessionIndex>", escape(index)))
            .unwrap_or_default();

        format!(
            concat!(
                r#"<samlp:LogoutRequest xmlns:samlp="{protocol}" xmlns:saml="{assertion}" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}">"#,
                r#"<saml:Issuer Format="{entity_format}">{issuer}</saml:Issuer>"#,
                r#"<saml:NameID Format="{transient}">{name_id}</saml:NameID>"#,
                "{session_index}",
                "</samlp:LogoutRequest>"
            ),
            protocol = PROTOCOL_NS,
            assertion = ASSERTION_NS,
            id = escape(&self.id),
            instant = self.issue_instant.format(INSTANT_FORMAT),
            destination = escape(&self.destination),
            entity_format = ENTITY_FORMAT,
            issuer = escape(&self.issuer),
            transient = NAMEID_TRANSIENT,
            name_id = escape(&self.name_id),
            session_index = session_index,
        )
    }
}

/// Raw DEFLATE followed by standard Base64, as the redirect binding requires.
pub fn deflate_encode(xml: &str) -> Result<String, ProtocolError> {
    let deflate_failed =
        |e: std::io::Error| ProtocolError::MalformedMessage(format!("deflate failed: {e}"));
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml.as_bytes()).map_err(deflate_failed)?;
    let compressed = encoder.finish().map_err(deflate_failed)?;
    Ok(STANDARD.encode(compressed))
}

/// Inverse of [`deflate_encode`].
pub fn inflate_decode(encoded: &str) -> Result<String, ProtocolError> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid base64: {e}")))?;
    let mut xml = String::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_string(&mut xml)
        .map_err(|e| ProtocolError::MalformedMessage(format!("inflate failed: {e}")))?;
    Ok(xml)
}

/// Appends an encoded message and optional relay state to `location`.
pub fn redirect_url(
    location: &str,
    parameter: &str,
    encoded: &str,
    relay_state: Option<&str>,
) -> Result<Url, ProtocolError> {
    let mut url = Url::parse(location)
        .map_err(|e| ProtocolError::Metadata(format!("invalid IdP endpoint {location}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(parameter, encoded);
        if let Some(relay_state) = relay_state {
            query.append_pair("RelayState", relay_state);
        }
    }
    Ok(url)
}
