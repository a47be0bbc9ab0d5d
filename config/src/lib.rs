//! Configuration types and loading for counter dump jobs.
//!
//! The types in [`shared`] are plain data: they describe connections, batching and the
//! declarative shape of each dump job. Turning a job description into a runnable engine is
//! the responsibility of the `dumper` crate.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
