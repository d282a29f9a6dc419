mod adapter;
mod client;
mod convert;
mod error;
mod logger;
mod status;
mod types;

pub use adapter::{FanAdapter, FanAdapterBuilder};
pub use convert::{percent_to_steps, steps_to_percent};
pub use error::{Error, Result};
pub use logger::WireLogMode;
pub use status::FanStatus;
pub use types::*;
