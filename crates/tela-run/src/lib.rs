#![doc = include_str!("../README.md")]

pub mod config;
pub mod format;
pub mod pretty;
pub mod run;
pub mod runlog;

pub use config::{TestConfig, parse_config, read_config};
pub use format::format;
pub use run::{count, run};
pub use runlog::RunLog;
