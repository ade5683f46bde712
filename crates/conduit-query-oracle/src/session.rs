//! Session pool settings shared by the reader and the writer.

use conduit_query::{DataError, ReaderConfig, Result};
use oracle::pool::{CloseMode, Pool, PoolBuilder};
use std::fmt;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info};

const DEFAULT_MIN_SESSIONS: u32 = 1;
const DEFAULT_MAX_SESSIONS: u32 = 5;
const DEFAULT_SESSION_INCREMENT: u32 = 1;

/// Merged settings of one Oracle service.
///
/// With `external_auth` the client authenticates through the OS or a
/// Kerberos ticket cache and `user`/`password` stay empty.
#[derive(Clone)]
pub(crate) struct OracleSettings {
    pub dsn: String,
    pub user: String,
    password: String,
    pub external_auth: bool,
    pub min_sessions: u32,
    pub max_sessions: u32,
    pub session_increment: u32,
}

impl fmt::Debug for OracleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleSettings")
            .field("dsn", &self.dsn)
            .field("user", &self.user)
            .field("external_auth", &self.external_auth)
            .field("min_sessions", &self.min_sessions)
            .field("max_sessions", &self.max_sessions)
            .field("session_increment", &self.session_increment)
            .finish()
    }
}

impl OracleSettings {
    pub fn from_config(config: &ReaderConfig) -> Result<Self> {
        let dsn = config.require_str("dsn")?;
        let external_auth = config.get_bool("external_auth")?;
        let (user, password) = if external_auth {
            (
                config.get_str("user").unwrap_or_default(),
                config.get_str("password").unwrap_or_default(),
            )
        } else {
            (config.require_str("user")?, config.require_str("password")?)
        };

        let min_sessions = config.pool_setting("min", DEFAULT_MIN_SESSIONS)?;
        let max_sessions = config.pool_setting("max", DEFAULT_MAX_SESSIONS)?;
        let session_increment = config.pool_setting("increment", DEFAULT_SESSION_INCREMENT)?;
        if min_sessions > max_sessions {
            return Err(DataError::configuration(format!(
                "pooling.min ({}) exceeds pooling.max ({})",
                min_sessions, max_sessions
            )));
        }

        Ok(Self {
            dsn,
            user,
            password,
            external_auth,
            min_sessions,
            max_sessions,
            session_increment,
        })
    }

    pub fn label(&self, role: &str) -> String {
        if self.external_auth {
            format!("oracle {} <external>@{}", role, self.dsn)
        } else {
            format!("oracle {} {}@{}", role, self.user, self.dsn)
        }
    }

    fn builder(&self) -> PoolBuilder {
        let mut builder = PoolBuilder::new(&self.user, &self.password, &self.dsn);
        builder
            .min_connections(self.min_sessions)
            .max_connections(self.max_sessions)
            .connection_increment(self.session_increment)
            .external_auth(self.external_auth);
        builder
    }

    pub async fn create_pool(&self) -> Result<Arc<Pool>> {
        debug!(
            "Creating Oracle session pool: {}@{} (external_auth={})",
            self.user, self.dsn, self.external_auth
        );

        let builder = self.builder();
        let pool = task::spawn_blocking(move || builder.build())
            .await
            .map_err(|e| DataError::ConnectionFailed(format!("Pool task failed: {}", e)))?
            .map_err(|e| DataError::ConnectionFailed(format!("Oracle connection failed: {}", e)))?;

        info!(
            "Created Oracle session pool for {} (min={}, max={}, increment={})",
            self.dsn, self.min_sessions, self.max_sessions, self.session_increment
        );
        Ok(Arc::new(pool))
    }
}

pub(crate) async fn close_pool(pool: Arc<Pool>, dsn: &str) -> Result<()> {
    task::spawn_blocking(move || pool.close(&CloseMode::Default))
        .await
        .map_err(|e| DataError::ConnectionFailed(format!("Pool task failed: {}", e)))?
        .map_err(|e| DataError::ConnectionFailed(format!("Failed to close pool: {}", e)))?;
    info!("Closed Oracle session pool for {}", dsn);
    Ok(())
}
