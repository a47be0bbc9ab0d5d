//! Drains partitioned hash counters into relational tables.
//!
//! An [`engine::Engine`] describes one dump job: the staging schema, the destinations the staged
//! rows are merged into and optional lifecycle hooks. Each run stages the counter rows selected
//! by its arguments into a temporary table, merges that table into every destination inside one
//! relational transaction and, once committed, deletes the drained partitions from the counter.
//!
//! Counters implement [`counter::CounterSource`] ([`counter::memory::MemoryCounter`],
//! [`counter::redis::RedisHashCounter`]) and relational stores implement
//! [`store::RelationalStore`] ([`store::postgres::PgStore`]).

pub mod counter;
pub mod destination;
pub mod engine;
pub mod error;
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod registry;
pub mod schema;
pub mod sql;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
