use log::error;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio::time::{timeout, Duration};
use tokio_postgres::{Client, NoTls};
use url::Url;

use crate::error::PersistenceError;

/// How the backend reaches the server. Resolved once at startup.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    /// Connection string with the `sslrootcert` parameter removed
    pub database_url: String,
    pub sslrootcert: Option<String>,
    pub connect_timeout: Duration,
    /// Deadline for one whole flush, connect included
    pub write_timeout: Duration,
}

impl ConnectSettings {
    /// Split the `sslrootcert` query parameter off a PostgreSQL URL.
    /// tokio-postgres does not understand it; it selects the CA file for TLS.
    pub fn parse(
        database_url: &str,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let url = Url::parse(database_url)?;

        let mut sslrootcert = None;
        let mut clean_params = Vec::new();
        for (key, value) in url.query_pairs() {
            if key == "sslrootcert" {
                sslrootcert = Some(value.to_string());
            } else {
                clean_params.push((key.into_owned(), value.into_owned()));
            }
        }

        let mut clean_url = url.clone();
        clean_url.set_query(None);
        if !clean_params.is_empty() {
            let query = clean_params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            clean_url.set_query(Some(&query));
        }

        Ok(Self {
            database_url: clean_url.to_string(),
            sslrootcert,
            connect_timeout,
            write_timeout,
        })
    }
}

pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, PersistenceError> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|e| PersistenceError::Tls(format!("SSL builder error: {}", e)))?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| PersistenceError::Tls(format!("Error loading CA cert: {}", e)))?;

    builder.set_verify(SslVerifyMode::PEER);

    Ok(MakeTlsConnector::new(builder.build()))
}

/// One connection attempt, bounded by the connect timeout
pub async fn connect(settings: &ConnectSettings) -> Result<Client, PersistenceError> {
    let url = settings.database_url.as_str();

    match &settings.sslrootcert {
        Some(path) => {
            let connector = create_ssl_connector(path)?;
            let (client, connection) = timeout(
                settings.connect_timeout,
                tokio_postgres::connect(url, connector),
            )
            .await
            .map_err(|_| PersistenceError::Timeout(settings.connect_timeout))??;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            Ok(client)
        }
        None => {
            let (client, connection) =
                timeout(settings.connect_timeout, tokio_postgres::connect(url, NoTls))
                    .await
                    .map_err(|_| PersistenceError::Timeout(settings.connect_timeout))??;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            Ok(client)
        }
    }
}
