//! Values flowing from counter stores into the staging buffer.

mod params;
mod value;

pub use params::{Params, Row};
pub use value::{DATE_FORMAT, TIMESTAMP_FORMAT, Value};
