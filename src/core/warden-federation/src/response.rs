//! Validation of `Response` messages posted to the ACS endpoint.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::ProtocolError,
    metadata::IdpMetadata,
    tracker::{PendingRequest, RequestTracker},
    verify::SignatureVerifier,
    xml::{ASSERTION_NS, CONFIRMATION_BEARER, DSIG_NS, PROTOCOL_NS, STATUS_SUCCESS},
};

const MAIL_ATTRIBUTES: [&str; 3] = ["mail", "email", "urn:oid:0.9.2342.19200300.100.1.3"];

/// Identity asserted by the IdP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationAttributes {
    /// Subject `NameID`.
    pub name_id: String,
    /// IdP session index, needed for single logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,
    /// Attribute values keyed by `Name` (and `FriendlyName` when present).
    #[serde(default)]
    pub values: BTreeMap<String, Vec<String>>,
}

impl FederationAttributes {
    /// First value of an attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Email from the usual mail attribute names.
    pub fn email(&self) -> Option<&str> {
        MAIL_ATTRIBUTES.iter().find_map(|name| self.get(name))
    }

    /// True when the IdP released no attributes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Checks responses against the tracked request and the IdP's identity.
pub struct ResponseValidator {
    sp_entity_id: String,
    acs_url: String,
    idp: IdpMetadata,
    clock_skew: Duration,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ResponseValidator {
    /// Creates a validator.
    pub fn new(
        sp_entity_id: impl Into<String>,
        acs_url: impl Into<String>,
        idp: IdpMetadata,
        clock_skew: Duration,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            sp_entity_id: sp_entity_id.into(),
            acs_url: acs_url.into(),
            idp,
            clock_skew,
            verifier,
        }
    }

    /// Identity provider this validator trusts.
    pub fn idp(&self) -> &IdpMetadata {
        &self.idp
    }

    /// Validates a base64 `SAMLResponse` posted with `relay_state`.
    ///
    /// The pending entry named by `InResponseTo` is consumed before any other
    /// check, so a response can never be replayed even if it fails later.
    pub async fn validate(
        &self,
        encoded: &str,
        relay_state: &str,
        tracker: &RequestTracker,
        now: DateTime<Utc>,
    ) -> Result<(FederationAttributes, PendingRequest), ProtocolError> {
        let xml = decode_post(encoded)?;
        let (attributes, pending) = self.inspect(&xml, relay_state, tracker, now)?;

        self.verifier
            .verify(&xml, &self.idp.signing_certificates)
            .await?;

        debug!(
            name_id = %attributes.name_id,
            request_id = %pending.id,
            "SAML response accepted"
        );
        Ok((attributes, pending))
    }

    fn inspect(
        &self,
        xml: &str,
        relay_state: &str,
        tracker: &RequestTracker,
        now: DateTime<Utc>,
    ) -> Result<(FederationAttributes, PendingRequest), ProtocolError> {
        let doc = Document::parse(xml)
            .map_err(|e| ProtocolError::MalformedMessage(format!("unparseable response: {e}")))?;
        let root = doc.root_element();
        if !root.has_tag_name((PROTOCOL_NS, "Response")) {
            return Err(ProtocolError::MalformedMessage(format!(
                "expected samlp:Response, found {}",
                root.tag_name().name()
            )));
        }

        let Some(in_response_to) = root.attribute("InResponseTo") else {
            warn!("Rejecting unsolicited SAML response");
            return Err(ProtocolError::UnmatchedResponse);
        };
        let pending = tracker.consume(in_response_to)?;
        if pending.relay_state != relay_state {
            warn!(request_id = %pending.id, "RelayState does not match the tracked request");
            return Err(ProtocolError::UnmatchedResponse);
        }

        let response = ParsedResponse::from_root(root)?;
        let attributes = self.check(response, &pending, now)?;
        Ok((attributes, pending))
    }

    fn check(
        &self,
        response: ParsedResponse,
        pending: &PendingRequest,
        now: DateTime<Utc>,
    ) -> Result<FederationAttributes, ProtocolError> {
        let invalid = |reason: &str| Err(ProtocolError::InvalidAssertion(reason.to_string()));

        if response.status != STATUS_SUCCESS {
            return Err(ProtocolError::InvalidAssertion(format!(
                "IdP returned status {}",
                response.status
            )));
        }
        if response
            .destination
            .as_deref()
            .is_some_and(|destination| destination != self.acs_url)
        {
            return invalid("Destination does not match the ACS URL");
        }
        if response
            .issuer
            .as_deref()
            .is_some_and(|issuer| issuer != self.idp.entity_id)
        {
            return invalid("response Issuer is not the configured IdP");
        }

        let assertion = response.assertion?;
        if assertion.issuer.as_deref() != Some(self.idp.entity_id.as_str()) {
            return invalid("assertion Issuer is not the configured IdP");
        }
        if !assertion.audiences.iter().any(|a| a == &self.sp_entity_id) {
            return invalid("assertion audience does not include this service provider");
        }

        let skew = chrono::Duration::from_std(self.clock_skew)
            .map_err(|e| ProtocolError::Configuration(format!("clock skew out of range: {e}")))?;
        if assertion.not_before.is_some_and(|nb| now + skew < nb) {
            return invalid("assertion is not yet valid");
        }
        if assertion.not_on_or_after.is_some_and(|noa| now - skew >= noa) {
            return invalid("assertion has expired");
        }

        let confirmed = assertion.confirmations.iter().any(|c| {
            c.method == CONFIRMATION_BEARER
                && c.recipient.as_deref().map_or(true, |r| r == self.acs_url)
                && c.in_response_to.as_deref().map_or(true, |id| id == pending.id)
                && c.not_on_or_after.map_or(true, |noa| now - skew < noa)
        });
        if !confirmed {
            return invalid("no valid bearer subject confirmation");
        }

        let Some(name_id) = assertion.name_id.filter(|id| !id.is_empty()) else {
            return invalid("assertion has no NameID");
        };

        Ok(FederationAttributes {
            name_id,
            session_index: assertion.session_index,
            values: assertion.attributes,
        })
    }
}

/// POST binding payloads are plain base64, possibly line-wrapped.
fn decode_post(encoded: &str) -> Result<String, ProtocolError> {
    let compact: String = encoded.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| ProtocolError::MalformedMessage(format!("invalid base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| ProtocolError::MalformedMessage("response is not UTF-8".into()))
}

struct ParsedResponse {
    destination: Option<String>,
    issuer: Option<String>,
    status: String,
    assertion: Result<ParsedAssertion, ProtocolError>,
}

struct ParsedAssertion {
    issuer: Option<String>,
    name_id: Option<String>,
    session_index: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_on_or_after: Option<DateTime<Utc>>,
    audiences: Vec<String>,
    confirmations: Vec<Confirmation>,
    attributes: BTreeMap<String, Vec<String>>,
}

struct Confirmation {
    method: String,
    recipient: Option<String>,
    in_response_to: Option<String>,
    not_on_or_after: Option<DateTime<Utc>>,
}

impl ParsedResponse {
    /// Extracts fields, checking structure. The assertion is kept as a
    /// `Result` so a non-success status is reported ahead of a missing one.
    fn from_root(root: Node<'_, '_>) -> Result<Self, ProtocolError> {
        reject_duplicate_ids(root)?;

        let status = child(root, PROTOCOL_NS, "Status")
            .and_then(|status| child(status, PROTOCOL_NS, "StatusCode"))
            .and_then(|code| code.attribute("Value"))
            .ok_or_else(|| ProtocolError::MalformedMessage("response has no StatusCode".into()))?
            .to_string();

        Ok(Self {
            destination: root.attribute("Destination").map(str::to_string),
            issuer: child(root, ASSERTION_NS, "Issuer").and_then(text),
            status,
            assertion: ParsedAssertion::from_response(root),
        })
    }
}

impl ParsedAssertion {
    fn from_response(root: Node<'_, '_>) -> Result<Self, ProtocolError> {
        if root
            .descendants()
            .any(|n| n.has_tag_name((ASSERTION_NS, "EncryptedAssertion")))
        {
            return Err(ProtocolError::InvalidAssertion(
                "encrypted assertions are not supported".into(),
            ));
        }

        let assertions: Vec<_> = root
            .descendants()
            .filter(|n| n.has_tag_name((ASSERTION_NS, "Assertion")))
            .collect();
        let assertion = match assertions.as_slice() {
            [single] if single.parent_element() == Some(root) => *single,
            [] => {
                return Err(ProtocolError::InvalidAssertion(
                    "response has no assertion".into(),
                ))
            },
            _ => {
                return Err(ProtocolError::InvalidAssertion(
                    "response must carry exactly one top-level assertion".into(),
                ))
            },
        };

        check_signature_placement(root, assertion)?;

        let subject = child(assertion, ASSERTION_NS, "Subject");
        let conditions = child(assertion, ASSERTION_NS, "Conditions");

        let confirmations = subject
            .into_iter()
            .flat_map(|s| s.children())
            .filter(|n| n.has_tag_name((ASSERTION_NS, "SubjectConfirmation")))
            .map(|confirmation| {
                let data = child(confirmation, ASSERTION_NS, "SubjectConfirmationData");
                Ok(Confirmation {
                    method: confirmation.attribute("Method").unwrap_or_default().to_string(),
                    recipient: data.and_then(|d| d.attribute("Recipient")).map(str::to_string),
                    in_response_to: data
                        .and_then(|d| d.attribute("InResponseTo"))
                        .map(str::to_string),
                    not_on_or_after: instant(data, "NotOnOrAfter")?,
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        let audiences = conditions
            .into_iter()
            .flat_map(|c| c.children())
            .filter(|n| n.has_tag_name((ASSERTION_NS, "AudienceRestriction")))
            .flat_map(|r| r.children())
            .filter(|n| n.has_tag_name((ASSERTION_NS, "Audience")))
            .filter_map(text)
            .collect();

        let session_index = child(assertion, ASSERTION_NS, "AuthnStatement")
            .and_then(|s| s.attribute("SessionIndex"))
            .map(str::to_string);

        Ok(Self {
            issuer: child(assertion, ASSERTION_NS, "Issuer").and_then(text),
            name_id: subject
                .and_then(|s| child(s, ASSERTION_NS, "NameID"))
                .and_then(text),
            session_index,
            not_before: instant(conditions, "NotBefore")?,
            not_on_or_after: instant(conditions, "NotOnOrAfter")?,
            audiences,
            confirmations,
            attributes: attributes(assertion),
        })
    }
}

fn attributes(assertion: Node<'_, '_>) -> BTreeMap<String, Vec<String>> {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let statements = assertion
        .children()
        .filter(|n| n.has_tag_name((ASSERTION_NS, "AttributeStatement")));

    for attribute in statements
        .flat_map(|s| s.children())
        .filter(|n| n.has_tag_name((ASSERTION_NS, "Attribute")))
    {
        let collected: Vec<String> = attribute
            .children()
            .filter(|n| n.has_tag_name((ASSERTION_NS, "AttributeValue")))
            .filter_map(text)
            .collect();

        let names = [attribute.attribute("Name"), attribute.attribute("FriendlyName")];
        for name in names.into_iter().flatten() {
            values
                .entry(name.to_string())
                .or_default()
                .extend(collected.iter().cloned());
        }
    }
    values
}

/// Every signature must be an immediate child of the response or the
/// assertion and reference its parent's `ID`; anything else is a wrapping
/// attempt.
fn check_signature_placement(
    root: Node<'_, '_>,
    assertion: Node<'_, '_>,
) -> Result<(), ProtocolError> {
    let signatures: Vec<_> = root
        .descendants()
        .filter(|n| n.has_tag_name((DSIG_NS, "Signature")))
        .collect();
    if signatures.is_empty() {
        return Err(ProtocolError::InvalidSignature("response is not signed".into()));
    }

    for signature in signatures {
        let Some(parent) = signature
            .parent_element()
            .filter(|p| *p == root || *p == assertion)
        else {
            return Err(ProtocolError::InvalidSignature(
                "signature outside the response or assertion".into(),
            ));
        };

        let expected = parent.attribute("ID").map(|id| format!("#{id}"));
        let references: Vec<_> = signature
            .descendants()
            .filter(|n| n.has_tag_name((DSIG_NS, "Reference")))
            .collect();
        let valid = matches!(references.as_slice(), [reference]
            if reference.attribute("URI").map(str::to_string) == expected && expected.is_some());
        if !valid {
            return Err(ProtocolError::InvalidSignature(
                "signature does not reference its enclosing element".into(),
            ));
        }
    }
    Ok(())
}

fn reject_duplicate_ids(root: Node<'_, '_>) -> Result<(), ProtocolError> {
    let mut seen = std::collections::HashSet::new();
    for id in root.descendants().filter_map(|n| n.attribute("ID")) {
        if !seen.insert(id) {
            return Err(ProtocolError::MalformedMessage(format!("duplicate ID {id}")));
        }
    }
    Ok(())
}

fn child<'a, 'input>(node: Node<'a, 'input>, ns: &str, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name((ns, name)))
}

fn text(node: Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn instant(
    node: Option<Node<'_, '_>>,
    attribute: &str,
) -> Result<Option<DateTime<Utc>>, ProtocolError> {
    node.and_then(|n| n.attribute(attribute))
        .map(|value| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    ProtocolError::MalformedMessage(format!("invalid {attribute} {value:?}: {e}"))
                })
        })
        .transpose()
}
