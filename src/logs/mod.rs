// Logs module - Output capture into per-instance log files

mod capture;
mod writer;

pub use capture::{InstanceLogs, LogCapture, LogPaths, LogStream};
pub use writer::{LineFormatter, LogFile, DEFAULT_DATE_FORMAT};
