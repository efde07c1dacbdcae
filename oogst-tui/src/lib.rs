pub mod monitor;

pub use monitor::{MonitorOptions, ProgressMonitor, run_monitor, run_plain_monitor};
