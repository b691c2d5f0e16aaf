//! CLI command implementations

mod config;
mod formats;
mod simulate;

pub use config::{config, ConfigArgs};
pub use formats::formats;
pub use simulate::{simulate, SimulateArgs};
