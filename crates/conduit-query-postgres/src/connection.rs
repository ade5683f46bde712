//! Connection settings and pool creation shared by the reader and the writer.

use crate::iam::TokenRequest;
use conduit_query::{DataError, ReaderConfig, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Lifetime of an RDS IAM token when `token_ttl` is not configured
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 900;

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// How the pool authenticates
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum Credentials {
    Password(String),
    /// Short-lived RDS IAM token generated per pool
    Iam { region: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(****)"),
            Credentials::Iam { region } => f.debug_struct("Iam").field("region", region).finish(),
        }
    }
}

/// Merged connection settings of one PostgreSQL endpoint
#[derive(Debug, Clone)]
pub(crate) struct PgSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub credentials: Credentials,
    pub sslmode: Option<String>,
    pub sslrootcert: Option<String>,
    pub token_ttl_secs: Option<u64>,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl PgSettings {
    pub fn from_config(config: &ReaderConfig) -> Result<Self> {
        let host = config.require_str("host")?;
        let port = config.require_u16("port")?;
        let user = config.require_str("user")?;
        let database = config.require_str("database")?;

        let credentials = if config.get_bool("iam_auth")? {
            Credentials::Iam {
                region: config.require_str("region")?,
            }
        } else {
            Credentials::Password(config.require_str("password")?)
        };

        let min_connections = config.pool_setting("minconn", DEFAULT_MIN_CONNECTIONS)?;
        let max_connections = config.pool_setting("maxconn", DEFAULT_MAX_CONNECTIONS)?;
        if min_connections > max_connections {
            return Err(DataError::configuration(format!(
                "pooling.minconn ({}) exceeds pooling.maxconn ({})",
                min_connections, max_connections
            )));
        }

        Ok(Self {
            host,
            port,
            user,
            database,
            credentials,
            sslmode: config.get_str("sslmode"),
            sslrootcert: config.get_str("sslrootcert"),
            token_ttl_secs: config.get_u64("token_ttl")?,
            min_connections,
            max_connections,
        })
    }

    pub fn label(&self, role: &str) -> String {
        format!(
            "postgres {} {}@{}:{}/{}",
            role, self.user, self.host, self.port, self.database
        )
    }

    pub fn is_iam(&self) -> bool {
        matches!(self.credentials, Credentials::Iam { .. })
    }

    /// Configured sslmode; IAM connections default to `require`
    pub fn ssl_mode(&self) -> Result<Option<PgSslMode>> {
        let configured = match (&self.sslmode, self.is_iam()) {
            (Some(mode), _) => mode.as_str(),
            (None, true) => "require",
            (None, false) => return Ok(None),
        };
        PgSslMode::from_str(configured).map(Some).map_err(|e| {
            DataError::configuration(format!("Invalid sslmode '{}': {}", configured, e))
        })
    }

    /// Token lifetime; only IAM connections get one by default
    pub fn token_ttl(&self) -> Option<Duration> {
        match (self.token_ttl_secs, self.is_iam()) {
            (Some(ttl), _) => Some(Duration::from_secs(ttl)),
            (None, true) => Some(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS)),
            (None, false) => None,
        }
    }

    pub fn connect_options(&self, password: &str) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(password)
            .database(&self.database);

        if let Some(mode) = self.ssl_mode()? {
            options = options.ssl_mode(mode);
        }
        if let Some(cert) = &self.sslrootcert {
            options = options.ssl_root_cert(cert);
        }

        Ok(options)
    }

    /// Connections are recycled once older than the token lifetime
    pub fn pool_options(&self) -> PgPoolOptions {
        let options = PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections);

        match self.token_ttl() {
            Some(ttl) => options.max_lifetime(ttl),
            None => options,
        }
    }
}

/// Whether a token issued at `issued` must be replaced before new connections open
pub(crate) fn token_needs_refresh(issued: Option<Instant>, now: Instant, ttl: Duration) -> bool {
    let Some(issued) = issued else {
        return true;
    };
    let margin = TOKEN_REFRESH_MARGIN.min(ttl / 2);
    now.saturating_duration_since(issued) + margin >= ttl
}

/// Creates pools and keeps IAM credentials fresh for them
pub(crate) struct PgConnector {
    settings: PgSettings,
    token_issued: Mutex<Option<Instant>>,
}

impl PgConnector {
    pub fn new(settings: PgSettings) -> Self {
        Self {
            settings,
            token_issued: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &PgSettings {
        &self.settings
    }

    async fn password(&self) -> Result<String> {
        match &self.settings.credentials {
            Credentials::Password(password) => Ok(password.clone()),
            Credentials::Iam { region } => self.generate_token(region).await,
        }
    }

    async fn generate_token(&self, region: &str) -> Result<String> {
        let settings = &self.settings;
        let request = TokenRequest {
            host: &settings.host,
            port: settings.port,
            user: &settings.user,
            region,
            expires_in: settings
                .token_ttl()
                .unwrap_or(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS)),
        };
        let token = request.generate().await?;
        *self.token_issued.lock().await = Some(Instant::now());
        Ok(token)
    }

    pub async fn create_pool(&self) -> Result<PgPool> {
        let settings = &self.settings;
        debug!(
            "Connecting to PostgreSQL: {}@{}:{}/{}",
            settings.user, settings.host, settings.port, settings.database
        );

        let password = self.password().await?;
        let options = settings.connect_options(&password)?;
        let pool = settings
            .pool_options()
            .connect_with(options)
            .await
            .map_err(|e| {
                DataError::ConnectionFailed(format!("PostgreSQL connection failed: {}", e))
            })?;

        info!(
            "Created PostgreSQL pool for {}:{}/{} (min={}, max={}, iam={})",
            settings.host,
            settings.port,
            settings.database,
            settings.min_connections,
            settings.max_connections,
            settings.is_iam()
        );
        Ok(pool)
    }

    /// Swap in a fresh IAM token before it expires; a no-op for password auth
    pub async fn refresh_credentials(&self, pool: &PgPool) -> Result<()> {
        let Credentials::Iam { region } = &self.settings.credentials else {
            return Ok(());
        };
        let Some(ttl) = self.settings.token_ttl() else {
            return Ok(());
        };

        let issued = *self.token_issued.lock().await;
        if !token_needs_refresh(issued, Instant::now(), ttl) {
            return Ok(());
        }

        info!(
            "Refreshing RDS IAM token for {}:{}",
            self.settings.host, self.settings.port
        );
        let token = self.generate_token(region).await?;
        pool.set_connect_options(self.settings.connect_options(&token)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_query::{BackendKind, ConfigMap};
    use serde_json::json;

    fn settings(value: serde_json::Value) -> Result<PgSettings> {
        let values: ConfigMap = value.as_object().unwrap().clone();
        PgSettings::from_config(&ReaderConfig::new(BackendKind::Postgres, values))
    }

    fn iam() -> serde_json::Value {
        json!({
            "host": "hr.cluster-abc.eu-west-1.rds.amazonaws.com",
            "port": 5432,
            "user": "etl",
            "database": "hr",
            "iam_auth": true,
            "region": "eu-west-1"
        })
    }

    #[test]
    fn test_iam_needs_no_password() {
        let settings = settings(iam()).unwrap();
        assert_eq!(
            settings.credentials,
            Credentials::Iam {
                region: "eu-west-1".into()
            }
        );
        assert!(matches!(settings.ssl_mode(), Ok(Some(PgSslMode::Require))));
        assert_eq!(
            settings.token_ttl(),
            Some(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS))
        );
        assert_eq!(
            settings.pool_options().get_max_lifetime(),
            Some(Duration::from_secs(DEFAULT_TOKEN_TTL_SECS))
        );
    }

    #[test]
    fn test_iam_requires_region() {
        let mut value = iam();
        value.as_object_mut().unwrap().remove("region");
        let err = settings(value).unwrap_err();
        assert!(matches!(
            err,
            DataError::MissingParameter { ref parameter, .. } if parameter == "region"
        ));
    }

    #[test]
    fn test_password_auth_keeps_configured_sslmode() {
        let mut value = iam();
        value["iam_auth"] = json!(false);
        assert!(matches!(
            settings(value.clone()),
            Err(DataError::MissingParameter { ref parameter, .. }) if parameter == "password"
        ));

        value["password"] = json!("secret");
        value["sslmode"] = json!("disable");
        let settings = settings(value).unwrap();
        assert!(matches!(settings.ssl_mode(), Ok(Some(PgSslMode::Disable))));
        assert_eq!(settings.token_ttl(), None);
    }

    #[test]
    fn test_token_refresh_window() {
        let ttl = Duration::from_secs(900);
        let now = Instant::now();
        assert!(token_needs_refresh(None, now, ttl));
        assert!(!token_needs_refresh(Some(now), now, ttl));
        assert!(!token_needs_refresh(Some(now), now + Duration::from_secs(800), ttl));
        assert!(token_needs_refresh(Some(now), now + Duration::from_secs(841), ttl));

        // short lifetimes refresh at half-life
        let short = Duration::from_secs(60);
        assert!(!token_needs_refresh(Some(now), now + Duration::from_secs(29), short));
        assert!(token_needs_refresh(Some(now), now + Duration::from_secs(30), short));
    }
}
