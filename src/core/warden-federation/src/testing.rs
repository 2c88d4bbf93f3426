//! Builders for IdP responses and canned signature verifiers.

#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};

use crate::{
    error::ProtocolError,
    verify::SignatureVerifier,
    xml::{
        escape, ASSERTION_NS, CONFIRMATION_BEARER, DSIG_NS, INSTANT_FORMAT, PROTOCOL_NS,
        STATUS_SUCCESS,
    },
};

/// Where the fixture places its (fake) signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePlacement {
    /// Enveloped in the `Response`.
    Response,
    /// Enveloped in the `Assertion`.
    Assertion,
    /// No signature at all.
    Unsigned,
    /// Inside `Extensions`, referencing the response: a wrapping attack shape.
    Wrapped,
}

/// A `samlp:Response` as an IdP would post it.
#[derive(Debug, Clone)]
pub struct ResponseFixture {
    /// `Response/@ID`.
    pub response_id: String,
    /// `Assertion/@ID`.
    pub assertion_id: String,
    /// `Response/@InResponseTo`; `None` models an IdP-initiated response.
    pub in_response_to: Option<String>,
    /// `Response/@Destination`.
    pub destination: Option<String>,
    /// Issuer of both response and assertion.
    pub idp_entity_id: String,
    /// `Audience` value.
    pub audience: String,
    /// `SubjectConfirmationData/@Recipient`.
    pub recipient: String,
    /// Top-level status code.
    pub status: String,
    /// Subject `NameID`.
    pub name_id: String,
    /// `AuthnStatement/@SessionIndex`.
    pub session_index: Option<String>,
    /// Conditions start; validity runs five minutes from here.
    pub issued_at: DateTime<Utc>,
    /// Released attributes.
    pub attributes: Vec<(String, Vec<String>)>,
    /// Signature placement.
    pub signature: SignaturePlacement,
    /// Emit a second assertion after the first.
    pub duplicate_assertion: bool,
}

impl ResponseFixture {
    /// A successful, signed response answering `in_response_to`.
    pub fn new(
        idp_entity_id: &str,
        sp_entity_id: &str,
        acs_url: &str,
        in_response_to: &str,
    ) -> Self {
        Self {
            response_id: "_response-1".into(),
            assertion_id: "_assertion-1".into(),
            in_response_to: Some(in_response_to.into()),
            destination: Some(acs_url.into()),
            idp_entity_id: idp_entity_id.into(),
            audience: sp_entity_id.into(),
            recipient: acs_url.into(),
            status: STATUS_SUCCESS.into(),
            name_id: "_transient-alice".into(),
            session_index: Some("_session-1".into()),
            issued_at: Utc::now(),
            attributes: Vec::new(),
            signature: SignaturePlacement::Response,
            duplicate_assertion: false,
        }
    }

    /// Adds a single-valued attribute.
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.into(), vec![value.into()]));
        self
    }

    /// Serialized response document.
    pub fn to_xml(&self) -> String {
        let not_before = self.issued_at.format(INSTANT_FORMAT);
        let not_after = (self.issued_at + chrono::Duration::minutes(5)).format(INSTANT_FORMAT);
        let issuer = format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.idp_entity_id));
        let in_response_to = self.in_response_to.as_deref().map(escape);

        let response_attrs = format!(
            r#"ID="{}" Version="2.0" IssueInstant="{not_before}"{}{}"#,
            escape(&self.response_id),
            self.destination
                .as_deref()
                .map(|d| format!(r#" Destination="{}""#, escape(d)))
                .unwrap_or_default(),
            in_response_to
                .as_deref()
                .map(|id| format!(r#" InResponseTo="{id}""#))
                .unwrap_or_default(),
        );

        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, values)| {
                let values: String = values
                    .iter()
                    .map(|v| format!("<saml:AttributeValue>{}</saml:AttributeValue>", escape(v)))
                    .collect();
                format!(r#"<saml:Attribute Name="{}">{values}</saml:Attribute>"#, escape(name))
            })
            .collect();

        let confirmation_data = format!(
            r#"<saml:SubjectConfirmationData Recipient="{}" NotOnOrAfter="{not_after}"{}/>"#,
            escape(&self.recipient),
            in_response_to
                .as_deref()
                .map(|id| format!(r#" InResponseTo="{id}""#))
                .unwrap_or_default(),
        );

        let session_index = self
            .session_index
            .as_deref()
            .map(|s| format!(r#" SessionIndex="{}""#, escape(s)))
            .unwrap_or_default();

        let assertion = |id: &str, signed: bool| {
            format!(
                concat!(
                    r#"<saml:Assertion ID="{id}" Version="2.0" IssueInstant="{nb}">"#,
                    "{issuer}{signature}",
                    r#"<saml:Subject><saml:NameID>{name_id}</saml:NameID>"#,
                    r#"<saml:SubjectConfirmation Method="{bearer}">{confirmation}</saml:SubjectConfirmation>"#,
                    "</saml:Subject>",
                    r#"<saml:Conditions NotBefore="{nb}" NotOnOrAfter="{na}">"#,
                    "<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>",
                    "</saml:Conditions>",
                    r#"<saml:AuthnStatement AuthnInstant="{nb}"{session_index}/>"#,
                    "<saml:AttributeStatement>{attributes}</saml:AttributeStatement>",
                    "</saml:Assertion>"
                ),
                id = escape(id),
                nb = not_before,
                na = not_after,
                issuer = issuer,
                signature = if signed { signature(id) } else { String::new() },
                name_id = escape(&self.name_id),
                bearer = CONFIRMATION_BEARER,
                confirmation = confirmation_data,
                audience = escape(&self.audience),
                session_index = session_index,
                attributes = attributes,
            )
        };

        let mut assertions =
            assertion(&self.assertion_id, self.signature == SignaturePlacement::Assertion);
        if self.duplicate_assertion {
            assertions.push_str(&assertion("_assertion-2", false));
        }

        let (response_signature, extensions) = match self.signature {
            SignaturePlacement::Response => (signature(&self.response_id), String::new()),
            SignaturePlacement::Wrapped => (
                String::new(),
                format!(
                    "<samlp:Extensions>{}</samlp:Extensions>",
                    signature(&self.response_id)
                ),
            ),
            _ => (String::new(), String::new()),
        };

        format!(
            concat!(
                r#"<samlp:Response xmlns:samlp="{protocol}" xmlns:saml="{assertion_ns}" {attrs}>"#,
                "{issuer}{signature}{extensions}",
                r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
                "{assertions}",
                "</samlp:Response>"
            ),
            protocol = PROTOCOL_NS,
            assertion_ns = ASSERTION_NS,
            attrs = response_attrs,
            issuer = issuer,
            signature = response_signature,
            extensions = extensions,
            status = escape(&self.status),
            assertions = assertions,
        )
    }

    /// Base64 form as posted in the `SAMLResponse` field.
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_xml())
    }
}

fn signature(reference: &str) -> String {
    format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{dsig}"><ds:SignedInfo>"#,
            r##"<ds:Reference URI="#{reference}"/>"##,
            "</ds:SignedInfo><ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue></ds:Signature>"
        ),
        dsig = DSIG_NS,
        reference = escape(reference),
    )
}

/// Verifier that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptingVerifier;

#[async_trait]
impl SignatureVerifier for AcceptingVerifier {
    async fn verify(&self, _xml: &str, _certificates: &[String]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Verifier that rejects everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingVerifier;

#[async_trait]
impl SignatureVerifier for RejectingVerifier {
    async fn verify(&self, _xml: &str, _certificates: &[String]) -> Result<(), ProtocolError> {
        Err(ProtocolError::InvalidSignature("signature mismatch".into()))
    }
}
