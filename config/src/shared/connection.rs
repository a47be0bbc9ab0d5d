use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Application name reported to Postgres by dump connections.
const APP_NAME_DUMPER: &str = "counter_dumper";

/// Session settings applied to every dump connection.
///
/// The staging buffer is populated with literal values, so date and number formatting must not
/// depend on server defaults.
fn session_options(statement_timeout_ms: u32) -> Vec<(String, String)> {
    vec![
        ("datestyle".to_string(), "ISO".to_string()),
        ("intervalstyle".to_string(), "postgres".to_string()),
        ("client_encoding".to_string(), "UTF8".to_string()),
        ("timezone".to_string(), "UTC".to_string()),
        (
            "statement_timeout".to_string(),
            statement_timeout_ms.to_string(),
        ),
        ("application_name".to_string(), APP_NAME_DUMPER.to_string()),
    ]
}

/// Connection settings for the relational store receiving merged counters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Database name.
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    #[serde(default = "TlsConfig::disabled")]
    pub tls: TlsConfig,
    /// Statement timeout in milliseconds, `0` disables it.
    #[serde(default)]
    pub statement_timeout_ms: u32,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::invalid("database.host", "must not be empty"));
        }

        self.tls.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }

    /// Rejects enabled TLS without trusted root certificates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts connection settings into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without selecting a database, used to create or drop databases.
    fn without_db(&self) -> Output;

    /// Options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };

        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .ssl_mode(ssl_mode)
            .options(session_options(self.statement_timeout_ms));

        if self.tls.enabled {
            options = options.ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes());
        }

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> PgConnectOptions {
        let options: PgConnectOptions = self.without_db();
        options.database(&self.name)
    }
}
