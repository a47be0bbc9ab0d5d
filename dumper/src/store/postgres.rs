use std::future::Future;
use std::time::Duration;

use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::error::DumpResult;
use crate::store::{RelationalStore, StoreTransaction};

/// Maximum number of connections in the pool.
///
/// Runs are sequential, one connection carries the whole run transaction.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool with idle connection cleanup.
///
/// No connection is opened until the first run begins its transaction.
fn create_database_pool(config: &PgConnectionConfig) -> PgPool {
    let options = config.with_db();

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Postgres backed [`RelationalStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(config: &PgConnectionConfig) -> Self {
        Self {
            pool: create_database_pool(config),
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RelationalStore for PgStore {
    type Transaction = PgStoreTransaction;

    async fn begin(&self) -> DumpResult<PgStoreTransaction> {
        let transaction = self.pool.begin().await?;

        Ok(PgStoreTransaction { transaction })
    }
}

/// A transaction on a [`PgStore`].
///
/// Statements are sent with the simple query protocol since they carry their values as literals.
pub struct PgStoreTransaction {
    transaction: Transaction<'static, Postgres>,
}

impl StoreTransaction for PgStoreTransaction {
    fn execute(&mut self, sql: &str) -> impl Future<Output = DumpResult<u64>> + Send {
        let sql = sql.to_string();

        async move {
            debug!(statement = %sql, "executing statement");
            let connection: &mut sqlx::PgConnection = &mut self.transaction;
            let result = sqlx::Executor::execute(connection, sqlx::raw_sql(&sql)).await?;

            Ok(result.rows_affected())
        }
    }

    async fn commit(self) -> DumpResult<()> {
        self.transaction.commit().await?;

        Ok(())
    }

    async fn rollback(self) -> DumpResult<()> {
        self.transaction.rollback().await?;

        Ok(())
    }
}
