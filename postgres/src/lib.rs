pub mod schema;
#[cfg(feature = "test-utils")]
pub mod sqlx;
