//! cli_support: option structs, settings file and logging setup shared by the binaries.

pub mod common;
pub mod config;
pub mod logging;

pub use common::{RuntimeArgs, ThresholdArgs, ThresholdOpts};
pub use config::{DetectorSettings, FilterSettings};
pub use logging::{init_logging, LogFormat};
