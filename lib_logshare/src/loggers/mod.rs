/// Installs the `tracing` subscriber: console output and optional rolling log files.
pub mod loggerlocal;

pub use loggerlocal::{LoggerLocal, LoggerLocalOptions};
