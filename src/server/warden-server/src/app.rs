//! Wiring of stores, directory, federation and the HTTP state.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_api::{ApiSettings, AppState};
use warden_auth::{
    AuthorizationResolver, DirectoryLogin, HybridAuthenticator, SessionCodec, TokenService,
};
use warden_directory::{DirectoryManager, HealthMonitor, HealthReport, Ldap3Connector};
use warden_federation::{
    FederationFlow, IdpMetadata, InsecureSkipVerifier, SignatureVerifier, Xmlsec1Verifier,
};
use warden_storage::{IdentityStore, RevocationStore};
use warden_storage_postgres::PostgresBackend;
use warden_storage_sqlite::SqliteBackend;

use crate::config::{DatabaseConfig, WardenConfig};

/// Storage handles, possibly backed by the same pool.
pub struct Stores {
    /// Employee and scope lookups.
    pub identities: Arc<dyn IdentityStore>,
    /// Token deny-list.
    pub revocations: Arc<dyn RevocationStore>,
    postgres: Option<Arc<PostgresBackend>>,
}

impl Stores {
    /// Opens the backend named by the URL scheme.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.expose_secret();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let backend = Arc::new(
                PostgresBackend::connect(url, &config.pool_settings())
                    .await
                    .context("Failed to connect to PostgreSQL")?,
            );
            Ok(Self {
                identities: backend.clone(),
                revocations: backend.clone(),
                postgres: Some(backend),
            })
        } else if url.starts_with("sqlite:") {
            warn!("Using SQLite storage - intended for development");
            let backend = Arc::new(
                SqliteBackend::connect(url)
                    .await
                    .context("Failed to open SQLite database")?,
            );
            Ok(Self {
                identities: backend.clone(),
                revocations: backend,
                postgres: None,
            })
        } else {
            anyhow::bail!("database.url must start with postgres:// or sqlite:");
        }
    }

    /// Closes pooled connections.
    pub async fn close(&self) {
        if let Some(postgres) = &self.postgres {
            postgres.close().await;
        }
    }
}

/// Running gateway components.
pub struct Gateway {
    /// Handler state.
    pub state: Arc<AppState>,
    /// Shared directory connection.
    pub directory: Arc<DirectoryManager>,
    /// Storage handles.
    pub stores: Stores,
    /// Cancels background tasks.
    pub cancel: CancellationToken,
    monitor: HealthMonitor,
    sweeper: JoinHandle<()>,
}

impl Gateway {
    /// Connects every backend and starts background tasks.
    pub async fn start(config: &WardenConfig) -> Result<Self> {
        let stores = Stores::open(&config.database).await?;
        stores
            .identities
            .ping()
            .await
            .context("Database ping failed")?;

        let directory = Arc::new(
            DirectoryManager::connect(config.directory.clone(), Arc::new(Ldap3Connector::new()))
                .await
                .context("Failed to connect to directory")?,
        );

        let federation = Arc::new(build_federation(config).await?);

        let tokens = Arc::new(TokenService::new(&config.token)?);
        let sessions = Arc::new(SessionCodec::new(&config.session.secret, config.session_ttl())?);

        let directory_health = Arc::new(HealthReport::new());
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::spawn(
            Arc::clone(&directory),
            config.directory.health_check_interval(),
            directory_health.clone(),
            cancel.child_token(),
        );
        let sweeper = spawn_sweeper(
            Arc::clone(&federation),
            Arc::clone(&stores.revocations),
            Duration::from_secs(config.server.sweep_interval_secs.max(1)),
            cancel.child_token(),
        );

        let state = Arc::new(AppState {
            login: DirectoryLogin::new(
                directory.clone(),
                AuthorizationResolver::new(Arc::clone(&stores.identities)),
                Arc::clone(&tokens),
            ),
            authenticator: HybridAuthenticator::new(
                Arc::clone(&tokens),
                Arc::clone(&sessions),
                Arc::clone(&stores.revocations),
            ),
            tokens,
            sessions,
            federation,
            directory_health,
            settings: ApiSettings {
                cookie_secure: config.session.cookie_secure,
                login_page: config.server.login_page.clone(),
                static_dir: config.server.static_dir.clone(),
            },
        });

        Ok(Self {
            state,
            directory,
            stores,
            cancel,
            monitor,
            sweeper,
        })
    }

    /// Stops background tasks and releases connections.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.monitor.stop().await;
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "Sweeper task panicked");
        }
        self.directory.close().await;
        self.stores.close().await;
    }
}

async fn build_federation(config: &WardenConfig) -> Result<FederationFlow> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    info!("Loading IdP metadata");
    let idp = IdpMetadata::resolve(&client, &config.federation)
        .await
        .context("Failed to load IdP metadata")?;

    let sp_certificate = match &config.federation.sp_certificate_path {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let verifier: Arc<dyn SignatureVerifier> =
        if config.federation.insecure_skip_signature_verification {
            warn!("SAML signature verification disabled - DO NOT USE IN PRODUCTION");
            Arc::new(InsecureSkipVerifier)
        } else {
            Arc::new(Xmlsec1Verifier::new(config.federation.xmlsec_binary.clone()))
        };

    FederationFlow::new(
        config.federation.clone(),
        idp,
        verifier,
        sp_certificate.as_deref(),
    )
    .context("Failed to initialize SAML service provider")
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Periodically drops expired SAML requests and deny-list entries.
fn spawn_sweeper(
    federation: Arc<FederationFlow>,
    revocations: Arc<dyn RevocationStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            federation.sweep_expired();
            match revocations.purge_expired(unix_now()).await {
                Ok(0) => {},
                Ok(purged) => debug!(purged, "Purged expired token revocations"),
                Err(e) => warn!(error = %e, "Failed to purge token revocations"),
            }
        }
        debug!("Sweeper stopped");
    })
}
