//! Shared configuration types for counter dump jobs.

mod base;
mod batch;
mod connection;
mod dumper;
mod job;
mod redis;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use connection::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use dumper::DumperConfig;
pub use job::{CounterConfig, DestinationConfig, FieldConfig, JobConfig};
pub use redis::RedisConfig;
