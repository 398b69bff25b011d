//! Database connection seam.
//!
//! The reconciler only needs "open a connection with these parameters".
//! [`MssqlConnector`] does that for SQL Server through `tiberius`; tests and
//! other drivers implement [`Connector`] themselves.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::types::TargetCredential;

/// Default SQL Server port.
const MSSQL_DEFAULT_PORT: u16 = 1433;

/// Connection attempt failure.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Target unreachable.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Server rejected the login or the session setup.
    #[error("Login rejected: {reason}")]
    Rejected {
        /// Driver message.
        reason: String,
    },

    /// Attempt exceeded the configured bound.
    #[error("Connection attempt timed out")]
    Timeout,
}

impl ConnectError {
    /// Create a rejection from a driver message.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Parameters handed to a database driver.
#[derive(Debug, Clone, Copy)]
pub struct ConnectParams<'a> {
    /// Driver identifier (e.g. `mssql`).
    pub driver: &'a str,
    /// Server host name.
    pub host: &'a str,
    /// Server port, driver default when absent.
    pub port: Option<u16>,
    /// Database or instance name.
    pub database: Option<&'a str>,
    /// Login name.
    pub username: &'a str,
    /// Login password.
    pub password: &'a SecretString,
}

impl<'a> ConnectParams<'a> {
    /// Parameters for a credential released by the vault.
    pub fn from_target(driver: &'a str, target: &'a TargetCredential) -> Self {
        Self {
            driver,
            host: &target.host,
            port: target.port,
            database: target.instance_or_database.as_deref(),
            username: &target.username,
            password: &target.password,
        }
    }
}

/// Opens database connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open connection handle.
    type Connection: Send;

    /// Open a connection.
    async fn connect(&self, params: &ConnectParams<'_>) -> Result<Self::Connection, ConnectError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for &T {
    type Connection = T::Connection;

    async fn connect(&self, params: &ConnectParams<'_>) -> Result<Self::Connection, ConnectError> {
        (**self).connect(params).await
    }
}

/// SQL Server connector.
#[derive(Debug, Clone, Default)]
pub struct MssqlConnector {
    trust_server_certificate: bool,
}

impl MssqlConnector {
    /// Create a connector.
    ///
    /// `trust_server_certificate` accepts self-signed server certificates,
    /// matching the default of the ODBC samples this replaces.
    pub fn new(trust_server_certificate: bool) -> Self {
        Self {
            trust_server_certificate,
        }
    }
}

/// Open SQL Server session.
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
}

impl MssqlConnection {
    /// Run a statement and return the first column of every row as text.
    pub async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, ConnectError> {
        let rows = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| ConnectError::rejected(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| ConnectError::rejected(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                row.try_get::<&str, _>(0)
                    .ok()
                    .flatten()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect())
    }

    /// Server version banner.
    pub async fn server_version(&mut self) -> Result<String, ConnectError> {
        Ok(self
            .query_strings("SELECT @@VERSION")
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    /// Close the session.
    pub async fn close(self) -> Result<(), ConnectError> {
        self.client
            .close()
            .await
            .map_err(|e| ConnectError::rejected(e.to_string()))
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    type Connection = MssqlConnection;

    async fn connect(&self, params: &ConnectParams<'_>) -> Result<MssqlConnection, ConnectError> {
        let mut config = Config::new();
        config.host(params.host);
        config.port(params.port.unwrap_or(MSSQL_DEFAULT_PORT));
        if let Some(database) = params.database {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(
            params.username,
            params.password.expose_secret(),
        ));
        if self.trust_server_certificate {
            config.trust_cert();
        }

        debug!(host = %params.host, port = ?params.port, database = ?params.database, "opening SQL Server session");

        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| ConnectError::rejected(e.to_string()))?;

        Ok(MssqlConnection { client })
    }
}
