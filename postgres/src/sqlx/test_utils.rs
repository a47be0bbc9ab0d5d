use config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use sqlx::{Connection, PgConnection, PgPool};

/// Creates the database named by `config` and returns a pool connected to it.
///
/// # Panics
/// Panics if the server is unreachable or the database cannot be created.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");

    sqlx::raw_sql(&format!("create database {}", quote_identifier(&config.name)))
        .execute(&mut connection)
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to the created database")
}

/// Terminates remaining sessions on the database named by `config` and drops it.
///
/// Failures are printed and ignored so cleanup never fails a test on its own.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db()).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {err}");
            return;
        }
    };

    let terminate = format!(
        "select pg_terminate_backend(pid) from pg_stat_activity \
         where datname = {} and pid <> pg_backend_pid()",
        quote_literal(&config.name)
    );
    if let Err(err) = sqlx::raw_sql(&terminate).execute(&mut connection).await {
        eprintln!(
            "warning: failed to terminate sessions on database {}: {err}",
            config.name
        );
    }

    let drop = format!("drop database if exists {}", quote_identifier(&config.name));
    if let Err(err) = sqlx::raw_sql(&drop).execute(&mut connection).await {
        eprintln!("warning: failed to drop database {}: {err}", config.name);
    }
}
