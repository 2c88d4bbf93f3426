//! Service-provider login and logout flow.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use url::Url;
use warden_crypto::generate_relay_state;

use crate::{
    config::FederationConfig,
    error::ProtocolError,
    metadata::{IdpMetadata, ServiceProviderMetadata},
    request::{deflate_encode, redirect_url, AuthnRequest, LogoutRequest},
    response::{FederationAttributes, ResponseValidator},
    tracker::RequestTracker,
    verify::SignatureVerifier,
};

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// IdP URL carrying `SAMLRequest` and `RelayState`.
    pub url: Url,
    /// Id of the tracked request.
    pub request_id: String,
    /// Relay state the response must echo.
    pub relay_state: String,
}

/// Outcome of a validated response.
#[derive(Debug, Clone)]
pub struct FederatedLogin {
    /// Asserted identity.
    pub attributes: FederationAttributes,
    /// Local path recorded when the login started.
    pub return_to: String,
}

/// Builds requests, tracks them and resolves the IdP's responses.
pub struct FederationFlow {
    config: FederationConfig,
    acs_url: Url,
    tracker: RequestTracker,
    validator: ResponseValidator,
    sp_metadata: ServiceProviderMetadata,
}

impl FederationFlow {
    /// Creates the flow for one identity provider.
    pub fn new(
        config: FederationConfig,
        idp: IdpMetadata,
        verifier: Arc<dyn SignatureVerifier>,
        sp_certificate_pem: Option<&str>,
    ) -> Result<Self, ProtocolError> {
        let acs_url = config.acs_url()?;
        let sp_metadata = ServiceProviderMetadata::new(&config, sp_certificate_pem)?;
        let validator = ResponseValidator::new(
            config.entity_id.clone(),
            acs_url.as_str(),
            idp,
            config.clock_skew(),
            verifier,
        );

        info!(
            entity_id = %config.entity_id,
            acs_url = %acs_url,
            idp = %validator.idp().entity_id,
            "SAML service provider initialized"
        );

        Ok(Self {
            tracker: RequestTracker::new(config.request_ttl()),
            config,
            acs_url,
            validator,
            sp_metadata,
        })
    }

    /// Identity provider metadata.
    pub fn idp(&self) -> &IdpMetadata {
        self.validator.idp()
    }

    /// Pending request table.
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Encodes an `AuthnRequest` for `idp_sso_location` and tracks it with a
    /// fresh relay state. `return_to` is clamped to a local path.
    pub fn build_authentication_request(
        &self,
        idp_sso_location: &str,
        return_to: &str,
    ) -> Result<LoginRedirect, ProtocolError> {
        let request = AuthnRequest::new(
            self.config.entity_id.as_str(),
            idp_sso_location,
            self.acs_url.as_str(),
        );
        let encoded = deflate_encode(&request.to_xml())?;
        let relay_state = generate_relay_state();
        let url = redirect_url(idp_sso_location, "SAMLRequest", &encoded, Some(&relay_state))?;

        self.tracker.track(
            request.id.as_str(),
            relay_state.as_str(),
            local_path(return_to),
            request.response_binding,
        );
        debug!(request_id = %request.id, "Tracked SAML authentication request");

        Ok(LoginRedirect {
            url,
            request_id: request.id,
            relay_state,
        })
    }

    /// Starts a login against the IdP's redirect-binding SSO endpoint.
    pub fn start_login(&self, return_to: &str) -> Result<LoginRedirect, ProtocolError> {
        let location = self.idp().sso_location()?.to_string();
        self.build_authentication_request(&location, return_to)
    }

    /// Validates a posted response and returns the asserted identity.
    pub async fn resolve_response(
        &self,
        saml_response: &str,
        relay_state: &str,
    ) -> Result<FederatedLogin, ProtocolError> {
        let (attributes, pending) = self
            .validator
            .validate(saml_response, relay_state, &self.tracker, Utc::now())
            .await?;

        info!(name_id = %attributes.name_id, "Federated login succeeded");
        Ok(FederatedLogin {
            attributes,
            return_to: pending.return_to,
        })
    }

    /// IdP single-logout URL for the session, if the IdP offers one.
    pub fn logout_redirect(
        &self,
        attributes: &FederationAttributes,
    ) -> Result<Option<Url>, ProtocolError> {
        let Some(location) = self.idp().slo_redirect_location.as_deref() else {
            return Ok(None);
        };

        let request = LogoutRequest::new(
            self.config.entity_id.as_str(),
            location,
            attributes.name_id.as_str(),
            attributes.session_index.clone(),
        );
        let encoded = deflate_encode(&request.to_xml())?;
        redirect_url(location, "SAMLRequest", &encoded, None).map(Some)
    }

    /// This service provider's metadata document.
    pub fn metadata_xml(&self) -> String {
        self.sp_metadata.to_xml()
    }

    /// Drops expired pending requests.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.tracker.sweep();
        if removed > 0 {
            debug!(removed, "Swept expired SAML requests");
        }
        removed
    }
}

/// Returns `target` if it is a same-origin path, `/` otherwise.
pub fn local_path(target: &str) -> &str {
    let is_local = target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control);
    if is_local {
        target
    } else {
        "/"
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::{
        request::inflate_decode,
        testing::{AcceptingVerifier, RejectingVerifier, ResponseFixture, SignaturePlacement},
    };
    use std::time::Duration;

    const IDP: &str = "https://idp.example.com/metadata";
    const SP: &str = "https://gateway.example.com/saml/metadata";
    const ACS: &str = "https://gateway.example.com/saml/acs";

    fn idp_metadata() -> IdpMetadata {
        IdpMetadata {
            entity_id: IDP.into(),
            sso_redirect_location: Some("https://idp.example.com/sso".into()),
            slo_redirect_location: Some("https://idp.example.com/slo".into()),
            signing_certificates: vec!["MIIB".into()],
        }
    }

    fn flow_with(verifier: Arc<dyn SignatureVerifier>) -> FederationFlow {
        let config = FederationConfig::new(SP, Url::parse("https://gateway.example.com").unwrap());
        FederationFlow::new(config, idp_metadata(), verifier, None).unwrap()
    }

    fn flow() -> FederationFlow {
        flow_with(Arc::new(AcceptingVerifier))
    }

    fn fixture(redirect: &LoginRedirect) -> ResponseFixture {
        ResponseFixture::new(IDP, SP, ACS, &redirect.request_id)
            .with_attribute("uid", "alice")
            .with_attribute("displayName", "Alice Liddell")
            .with_attribute("mail", "alice@example.com")
    }

    #[test]
    fn test_login_redirect_carries_tracked_request() {
        let flow = flow();
        let redirect = flow.start_login("/reports").unwrap();

        assert_eq!(redirect.url.host_str(), Some("idp.example.com"));
        let params: std::collections::HashMap<_, _> = redirect.url.query_pairs().collect();
        assert_eq!(params["RelayState"], redirect.relay_state);

        let xml = inflate_decode(&params["SAMLRequest"]).unwrap();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        assert_eq!(
            doc.root_element().attribute("ID"),
            Some(redirect.request_id.as_str())
        );
        assert_eq!(
            doc.root_element().attribute("AssertionConsumerServiceURL"),
            Some(ACS)
        );
        assert!(flow.tracker().is_pending(&redirect.request_id));
    }

    #[test]
    fn test_missing_sso_location_is_reported() {
        let config = FederationConfig::new(SP, Url::parse("https://gateway.example.com").unwrap());
        let mut idp = idp_metadata();
        idp.sso_redirect_location = None;
        let flow = FederationFlow::new(config, idp, Arc::new(AcceptingVerifier), None).unwrap();

        let err = flow.start_login("/").unwrap_err();
        assert!(err.to_string().contains("IdP SSO URL not configured"));
    }

    #[tokio::test]
    async fn test_resolve_tracked_response() {
        let flow = flow();
        let redirect = flow.start_login("/reports").unwrap();

        let login = flow
            .resolve_response(&fixture(&redirect).encode(), &redirect.relay_state)
            .await
            .unwrap();

        assert_eq!(login.return_to, "/reports");
        assert_eq!(login.attributes.name_id, "_transient-alice");
        assert_eq!(login.attributes.get("uid"), Some("alice"));
        assert_eq!(login.attributes.get("displayName"), Some("Alice Liddell"));
        assert_eq!(login.attributes.email(), Some("alice@example.com"));
        assert_eq!(login.attributes.session_index.as_deref(), Some("_session-1"));
    }

    #[tokio::test]
    async fn test_replayed_response_is_unmatched() {
        let flow = flow();
        let redirect = flow.start_login("/").unwrap();
        let response = fixture(&redirect).encode();

        flow.resolve_response(&response, &redirect.relay_state)
            .await
            .unwrap();
        let replay = flow.resolve_response(&response, &redirect.relay_state).await;

        assert!(matches!(replay, Err(ProtocolError::UnmatchedResponse)));
    }

    #[tokio::test]
    async fn test_untracked_response_is_unmatched() {
        let flow = flow();
        let response = ResponseFixture::new(IDP, SP, ACS, "id-never-issued").encode();

        let result = flow.resolve_response(&response, "relay").await;
        assert!(matches!(result, Err(ProtocolError::UnmatchedResponse)));
    }

    #[tokio::test]
    async fn test_unsolicited_response_is_unmatched() {
        let flow = flow();
        let redirect = flow.start_login("/").unwrap();
        let mut fixture = fixture(&redirect);
        fixture.in_response_to = None;

        let result = flow
            .resolve_response(&fixture.encode(), &redirect.relay_state)
            .await;
        assert!(matches!(result, Err(ProtocolError::UnmatchedResponse)));
    }

    #[tokio::test]
    async fn test_relay_state_mismatch_is_unmatched_and_consumes() {
        let flow = flow();
        let redirect = flow.start_login("/").unwrap();
        let response = fixture(&redirect).encode();

        let result = flow.resolve_response(&response, "forged").await;
        assert!(matches!(result, Err(ProtocolError::UnmatchedResponse)));

        let retry = flow.resolve_response(&response, &redirect.relay_state).await;
        assert!(matches!(retry, Err(ProtocolError::UnmatchedResponse)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_request_is_unmatched() {
        let flow = flow();
        let redirect = flow.start_login("/").unwrap();

        tokio::time::advance(Duration::from_secs(91)).await;

        let result = flow
            .resolve_response(&fixture(&redirect).encode(), &redirect.relay_state)
            .await;
        assert!(matches!(result, Err(ProtocolError::UnmatchedResponse)));
        assert_eq!(flow.sweep_expired(), 0);
    }

    #[tokio::test]
    async fn test_assertion_checks() {
        type Tamper = fn(&mut ResponseFixture);
        let cases: [(Tamper, &str); 7] = [
            (|f| f.status = "urn:oasis:names:tc:SAML:2.0:status:Requester".into(), "status"),
            (|f| f.audience = "https://other.example.com".into(), "audience"),
            (|f| f.idp_entity_id = "https://evil.example.com".into(), "Issuer"),
            (|f| f.destination = Some("https://other.example.com/acs".into()), "Destination"),
            (|f| f.recipient = "https://other.example.com/acs".into(), "confirmation"),
            (|f| f.issued_at = Utc::now() - chrono::Duration::hours(2), "expired"),
            (|f| f.issued_at = Utc::now() + chrono::Duration::hours(2), "not yet valid"),
        ];

        for (tamper, expected) in cases {
            let flow = flow();
            let redirect = flow.start_login("/").unwrap();
            let mut fixture = fixture(&redirect);
            tamper(&mut fixture);

            let result = flow
                .resolve_response(&fixture.encode(), &redirect.relay_state)
                .await;
            match result {
                Err(ProtocolError::InvalidAssertion(reason)) => {
                    assert!(reason.contains(expected), "{reason} lacks {expected}")
                },
                other => panic!("expected InvalidAssertion({expected}), got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_clock_skew_is_tolerated() {
        let flow = flow();
        let redirect = flow.start_login("/").unwrap();
        let mut fixture = fixture(&redirect);
        fixture.issued_at = Utc::now() + chrono::Duration::seconds(60);

        let result = flow
            .resolve_response(&fixture.encode(), &redirect.relay_state)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_signature_structure() {
        for placement in [SignaturePlacement::Unsigned, SignaturePlacement::Wrapped] {
            let flow = flow();
            let redirect = flow.start_login("/").unwrap();
            let mut fixture = fixture(&redirect);
            fixture.signature = placement;

            let result = flow
                .resolve_response(&fixture.encode(), &redirect.relay_state)
                .await;
            assert!(
                matches!(result, Err(ProtocolError::InvalidSignature(_))),
                "{placement:?} accepted"
            );
        }

        let flow = flow();
        let redirect = flow.start_login("/").unwrap();
        let mut fixture = fixture(&redirect);
        fixture.signature = SignaturePlacement::Assertion;
        let result = flow
            .resolve_response(&fixture.encode(), &redirect.relay_state)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_assertion_is_rejected() {
        let flow = flow();
        let redirect = flow.start_login("/").unwrap();
        let mut fixture = fixture(&redirect);
        fixture.duplicate_assertion = true;

        let result = flow
            .resolve_response(&fixture.encode(), &redirect.relay_state)
            .await;
        assert!(matches!(result, Err(ProtocolError::InvalidAssertion(_))));
    }

    #[tokio::test]
    async fn test_failed_verification_is_invalid_signature() {
        let flow = flow_with(Arc::new(RejectingVerifier));
        let redirect = flow.start_login("/").unwrap();

        let result = flow
            .resolve_response(&fixture(&redirect).encode(), &redirect.relay_state)
            .await;
        assert!(matches!(result, Err(ProtocolError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let flow = flow();
        assert!(matches!(
            flow.resolve_response("not base64!", "relay").await,
            Err(ProtocolError::MalformedMessage(_))
        ));

        use base64::{engine::general_purpose::STANDARD, Engine};
        let doctype = STANDARD.encode(r#"<!DOCTYPE x [<!ENTITY e "boom">]><x>&e;</x>"#);
        assert!(matches!(
            flow.resolve_response(&doctype, "relay").await,
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_logout_redirect_targets_idp_slo() {
        let flow = flow();
        let attributes = FederationAttributes {
            name_id: "_transient-alice".into(),
            session_index: Some("_session-1".into()),
            ..Default::default()
        };

        let url = flow.logout_redirect(&attributes).unwrap().unwrap();
        assert!(url.as_str().starts_with("https://idp.example.com/slo?SAMLRequest="));

        let config = FederationConfig::new(SP, Url::parse("https://gateway.example.com").unwrap());
        let mut idp = idp_metadata();
        idp.slo_redirect_location = None;
        let flow = FederationFlow::new(config, idp, Arc::new(AcceptingVerifier), None).unwrap();
        assert!(flow.logout_redirect(&attributes).unwrap().is_none());
    }

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("/reports?x=1"), "/reports?x=1");
        assert_eq!(local_path("//evil.example.com"), "/");
        assert_eq!(local_path("https://evil.example.com"), "/");
        assert_eq!(local_path("/\\evil.example.com"), "/");
        assert_eq!(local_path(""), "/");
    }
}
