mod base;
pub mod postgres;

pub use base::{RelationalStore, StoreTransaction};
