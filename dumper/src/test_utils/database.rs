use config::shared::{PgConnectionConfig, TlsConfig};
use postgres::sqlx::test_utils::{create_pg_database, drop_pg_database};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::postgres::PgStore;

/// Connection settings for a uniquely named database on the test server.
///
/// Reads `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME` and the optional
/// `TESTS_DATABASE_PASSWORD`.
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
        statement_timeout_ms: 0,
    }
}

/// A throwaway database, dropped by [`TestDatabase::cleanup`].
pub struct TestDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Creates a new database with a random name.
    pub async fn spawn() -> TestDatabase {
        let config = local_pg_connection_config();
        let pool = create_pg_database(&config).await;

        TestDatabase { config, pool }
    }

    /// Returns a store on this database using the run's own pool settings.
    pub fn store(&self) -> PgStore {
        PgStore::new(&self.config)
    }

    /// Runs `sql` outside any dump transaction.
    pub async fn execute(&self, sql: &str) {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|err| panic!("failed to execute `{sql}`: {err}"));
    }

    pub async fn cleanup(self) {
        self.pool.close().await;
        drop_pg_database(&self.config).await;
    }
}
