//! Integration tests for the Warden gateway.
//!
//! The full router is served on a loopback port and driven over HTTP. The
//! directory is the in-memory fake, storage is SQLite in a temp dir, and SAML
//! signatures are accepted by a test verifier.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::{net::TcpListener, task::JoinHandle};
use url::Url;
use warden_api::{ApiSettings, AppState};
use warden_auth::{
    AuthorizationResolver, DirectoryLogin, HybridAuthenticator, SessionCodec, TokenConfig,
    TokenService,
};
use warden_directory::{mock::MockDirectory, DirectoryManager, HealthReport};
use warden_federation::{
    request::inflate_decode, testing::AcceptingVerifier, FederationConfig, FederationFlow,
    IdpMetadata,
};
use warden_storage_sqlite::SqliteBackend;

pub const IDP: &str = "https://idp.example.com/metadata";
pub const SP: &str = "https://gateway.example.com/saml/metadata";
pub const ACS: &str = "https://gateway.example.com/saml/acs";

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Test Server
// ============================================================================

/// Knobs for one server instance.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Pending SAML request lifetime.
    pub request_ttl_secs: u64,
    /// Artificial directory round-trip latency.
    pub directory_latency: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_ttl_secs: 90,
            directory_latency: Duration::ZERO,
        }
    }
}

/// A gateway served on a loopback port.
pub struct TestServer {
    pub base_url: String,
    pub directory: MockDirectory,
    pub state: Arc<AppState>,
    server: JoinHandle<()>,
    _data_dir: TempDir,
}

impl TestServer {
    /// Starts a gateway with default options.
    pub async fn start() -> Result<Self> {
        Self::start_with(ServerOptions::default()).await
    }

    /// Starts a gateway.
    ///
    /// Directory users: `alice` (provisioned, scopes `read:reports` and
    /// `admin`), `bob` (present twice), `dave` (not provisioned).
    pub async fn start_with(options: ServerOptions) -> Result<Self> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;
        std::fs::write(data_dir.path().join("login.html"), "<h1>Sign in</h1>")?;

        let store = Arc::new(SqliteBackend::open(data_dir.path().join("warden.db")).await?);
        let alice = store
            .insert_employee("alice", Some("Alice"), "alice@example.com")
            .await?;
        store.grant_scope(alice, "read:reports").await?;
        store.grant_scope(alice, "admin").await?;
        let bob = store
            .insert_employee("bob", Some("Bob"), "bob@example.com")
            .await?;
        store.grant_scope(bob, "read:reports").await?;

        let directory = MockDirectory::new();
        directory.add_user("alice", "alice@example.com", "wonderland");
        directory.add_user("bob", "bob@example.com", "builder");
        directory.add_user_in("bob", "contractors", "bob@contractor.example.com", "other");
        directory.add_user("dave", "dave@example.com", "unprovisioned");
        directory.set_latency(options.directory_latency);
        let manager = Arc::new(DirectoryManager::new(
            directory.config(),
            Arc::new(directory.clone()),
        ));

        let tokens = Arc::new(TokenService::new(&TokenConfig::new(
            "integration-secret-minimum-32-chars",
            1,
        ))?);
        let sessions = Arc::new(SessionCodec::new(
            &SecretString::from("integration-session-secret-32-chars"),
            Duration::from_secs(3600),
        )?);

        let mut federation_config =
            FederationConfig::new(SP, Url::parse("https://gateway.example.com")?);
        federation_config.request_ttl_secs = options.request_ttl_secs;
        let idp = IdpMetadata {
            entity_id: IDP.into(),
            sso_redirect_location: Some("https://idp.example.com/sso".into()),
            slo_redirect_location: Some("https://idp.example.com/slo".into()),
            signing_certificates: vec!["MIIB".into()],
        };
        let federation = Arc::new(FederationFlow::new(
            federation_config,
            idp,
            Arc::new(AcceptingVerifier),
            None,
        )?);

        let state = Arc::new(AppState {
            login: DirectoryLogin::new(
                manager,
                AuthorizationResolver::new(store.clone()),
                Arc::clone(&tokens),
            ),
            authenticator: HybridAuthenticator::new(
                Arc::clone(&tokens),
                Arc::clone(&sessions),
                store,
            ),
            tokens,
            sessions,
            federation,
            directory_health: Arc::new(HealthReport::new()),
            settings: ApiSettings {
                cookie_secure: false,
                login_page: data_dir.path().join("login.html"),
                static_dir: data_dir.path().to_path_buf(),
            },
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let app = warden_api::router(Arc::clone(&state));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            directory,
            state,
            server,
            _data_dir: data_dir,
        })
    }

    /// A fresh client with its own cookie jar.
    pub fn client(&self) -> GatewayClient {
        GatewayClient::new(&self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// Browser-like client: keeps cookies, does not follow redirects.
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .cookie_store(true)
                .redirect(Policy::none())
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    pub async fn get_with_bearer(&self, path: &str, token: &str) -> Result<Response> {
        Ok(self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?)
    }

    pub async fn ldap_login(&self, username: &str, password: &str) -> Result<Response> {
        Ok(self
            .client
            .post(self.url("/ldap-login"))
            .json(&LoginRequest { username, password })
            .send()
            .await?)
    }

    pub async fn post_acs(&self, saml_response: &str, relay_state: &str) -> Result<Response> {
        Ok(self
            .client
            .post(self.url("/saml/acs"))
            .form(&[("SAMLResponse", saml_response), ("RelayState", relay_state)])
            .send()
            .await?)
    }
}

/// Request id and relay state carried by an IdP redirect.
pub fn pending_request(location: &str) -> Result<(String, String)> {
    let url = Url::parse(location)?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .with_context(|| format!("{name} missing from redirect"))
    };
    let xml = inflate_decode(&param("SAMLRequest")?)?;
    let doc = roxmltree::Document::parse(&xml)?;
    let id = doc
        .root_element()
        .attribute("ID")
        .context("AuthnRequest without ID")?
        .to_string();
    Ok((id, param("RelayState")?))
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

pub fn is_redirect_to_login(response: &Response) -> bool {
    response.status() == StatusCode::FOUND && location(response) == "/login"
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinSet;
    use warden_auth::AuthMethod;
    use warden_federation::testing::ResponseFixture;

    async fn federated_client(server: &TestServer) -> GatewayClient {
        let client = server.client();
        let redirect = client.get("/sso-login").await.unwrap();
        assert_eq!(redirect.status(), StatusCode::FOUND);
        let (request_id, relay_state) = pending_request(&location(&redirect)).unwrap();

        let saml_response = ResponseFixture::new(IDP, SP, ACS, &request_id)
            .with_attribute("uid", "alice")
            .with_attribute("displayName", "Alice Liddell")
            .with_attribute("mail", "alice@example.com")
            .encode();
        let acs = client.post_acs(&saml_response, &relay_state).await.unwrap();
        assert_eq!(acs.status(), StatusCode::FOUND);
        assert_eq!(location(&acs), "/");
        client
    }

    #[tokio::test]
    async fn test_directory_login_scenario() {
        let server = TestServer::start().await.unwrap();
        let client = server.client();

        let response = client.ldap_login("alice", "wonderland").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response)
            .iter()
            .any(|c| c.starts_with("ldap_token=") && c.contains("HttpOnly")));

        let body: LoginResponse = response.json().await.unwrap();
        let claims = server.state.tokens.validate(&body.token).unwrap();
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.scopes, vec!["admin", "read:reports"]);

        // The cookie alone gets the browser through the guard.
        let page = client.get("/").await.unwrap();
        assert_eq!(page.status(), StatusCode::OK);
        assert!(page.text().await.unwrap().contains("alice@example.com"));
    }

    #[tokio::test]
    async fn test_wrong_password_scenario() {
        let server = TestServer::start().await.unwrap();
        let client = server.client();

        let response = client.ldap_login("alice", "looking-glass").await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&response).is_empty());
        let error: ErrorResponse = response.json().await.unwrap();
        assert!(!error.error.contains("looking-glass"));
        assert!(is_redirect_to_login(&client.get("/").await.unwrap()));
    }

    #[tokio::test]
    async fn test_ambiguous_entry_scenario() {
        let server = TestServer::start().await.unwrap();

        // Correct password for one of the two matching entries.
        let response = server.client().ldap_login("bob", "builder").await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&response).is_empty());
        assert_eq!(server.directory.user_bind_attempts(), 0);
    }

    #[tokio::test]
    async fn test_unprovisioned_identity_is_refused() {
        let server = TestServer::start().await.unwrap();

        let response = server
            .client()
            .ldap_login("dave", "unprovisioned")
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&response).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_logins_are_serialized() {
        let server = TestServer::start_with(ServerOptions {
            directory_latency: Duration::from_millis(5),
            ..ServerOptions::default()
        })
        .await
        .unwrap();

        let mut logins = JoinSet::new();
        for i in 0..12 {
            let client = server.client();
            let password = if i % 3 == 0 { "wrong" } else { "wonderland" };
            logins.spawn(async move {
                client.ldap_login("alice", password).await.unwrap().status()
            });
        }

        let mut ok = 0;
        while let Some(status) = logins.join_next().await {
            match status.unwrap() {
                StatusCode::OK => ok += 1,
                status => assert_eq!(status, StatusCode::UNAUTHORIZED),
            }
        }

        assert_eq!(ok, 8);
        assert_eq!(server.directory.max_concurrent_operations(), 1);
        assert_eq!(server.directory.searches_while_user_bound(), 0);
        let service_dn = server.directory.service_dn();
        assert!(server
            .directory
            .live_bindings()
            .iter()
            .all(|bound| bound.as_deref() == Some(service_dn.as_str())));
    }

    #[tokio::test]
    async fn test_directory_outage_is_service_unavailable() {
        let server = TestServer::start().await.unwrap();
        server.directory.set_reachable(false);

        let response = server
            .client()
            .ldap_login("alice", "wonderland")
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_federation_login_scenario() {
        let server = TestServer::start().await.unwrap();
        let client = federated_client(&server).await;

        let page = client.get("/").await.unwrap();
        assert_eq!(page.status(), StatusCode::OK);
        let body = page.text().await.unwrap();
        assert!(body.contains("Logged in via SAML"));
        assert!(body.contains("displayName: Alice Liddell"));
    }

    #[tokio::test]
    async fn test_untracked_federation_response_is_rejected() {
        let server = TestServer::start().await.unwrap();
        let client = server.client();

        let saml_response = ResponseFixture::new(IDP, SP, ACS, "id-forged")
            .with_attribute("mail", "alice@example.com")
            .encode();
        let response = client.post_acs(&saml_response, "forged").await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(is_redirect_to_login(&client.get("/").await.unwrap()));
    }

    #[tokio::test]
    async fn test_expired_federation_request_is_rejected() {
        let server = TestServer::start_with(ServerOptions {
            request_ttl_secs: 0,
            ..ServerOptions::default()
        })
        .await
        .unwrap();
        let client = server.client();

        let redirect = client.get("/sso-login").await.unwrap();
        let (request_id, relay_state) = pending_request(&location(&redirect)).unwrap();
        let saml_response = ResponseFixture::new(IDP, SP, ACS, &request_id)
            .with_attribute("mail", "alice@example.com")
            .encode();

        let response = client.post_acs(&saml_response, &relay_state).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(set_cookies(&response).is_empty());
    }

    #[tokio::test]
    async fn test_federation_logout_scenario() {
        let server = TestServer::start().await.unwrap();
        let client = federated_client(&server).await;

        let logout = client.get("/logout").await.unwrap();

        assert_eq!(logout.status(), StatusCode::FOUND);
        assert_eq!(location(&logout), "/saml/logout");
        let cleared = set_cookies(&logout);
        assert!(cleared
            .iter()
            .any(|c| c.starts_with("ldap_token=;") && c.contains("Max-Age=0")));
        assert!(is_redirect_to_login(&client.get("/").await.unwrap()));

        // The browser follows on to single logout with the cookies it kept.
        let single_logout = client.get("/saml/logout").await.unwrap();
        assert_eq!(single_logout.status(), StatusCode::FOUND);
        assert!(location(&single_logout).starts_with("https://idp.example.com/slo?SAMLRequest="));

        // The ticket is spent.
        let again = client.get("/saml/logout").await.unwrap();
        assert_eq!(location(&again), "/login");
    }

    #[tokio::test]
    async fn test_directory_logout_scenario() {
        let server = TestServer::start().await.unwrap();
        let client = server.client();
        let body: LoginResponse = client
            .ldap_login("alice", "wonderland")
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let logout = client.get("/logout").await.unwrap();

        assert_eq!(logout.status(), StatusCode::FOUND);
        assert_eq!(location(&logout), "/login");
        assert!(set_cookies(&logout)
            .iter()
            .any(|c| c.starts_with("ldap_token=;")));

        // The token was deny-listed, so presenting it directly fails too.
        let replay = server
            .client()
            .get_with_bearer("/", &body.token)
            .await
            .unwrap();
        assert!(is_redirect_to_login(&replay));
    }

    #[tokio::test]
    async fn test_bearer_token_beats_federation_session() {
        let server = TestServer::start().await.unwrap();
        let client = federated_client(&server).await;
        let token = server
            .state
            .tokens
            .issue("carol@example.com", &["audit".to_string()])
            .unwrap();

        let page = client.get_with_bearer("/", &token).await.unwrap();

        assert_eq!(page.status(), StatusCode::OK);
        let body = page.text().await.unwrap();
        assert!(body.contains("carol@example.com"));
        assert!(!body.contains("Logged in via SAML"));
    }

    #[tokio::test]
    async fn test_auth_session_records_method() {
        let server = TestServer::start().await.unwrap();
        let client = server.client();

        let response = client.ldap_login("alice", "wonderland").await.unwrap();
        let auth_session = set_cookies(&response)
            .iter()
            .find_map(|c| {
                c.strip_prefix("auth_session=")
                    .and_then(|rest| rest.split(';').next())
                    .map(str::to_string)
            })
            .unwrap();

        assert_eq!(
            server.state.sessions.decode_auth_session(&auth_session).unwrap(),
            AuthMethod::Directory
        );
    }
}
