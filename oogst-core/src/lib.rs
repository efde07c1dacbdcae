pub mod config;
pub mod extract;
pub mod frontier;
pub mod harvest;
pub mod progress;

pub use config::{ConfigError, HarvestConfig};
pub use extract::{MetadataExtractor, MetadataRecord};
pub use frontier::{EntryState, Frontier, FrontierEntry, FrontierError, FrontierStats};
pub use harvest::{
    BatchMode, DiscoverReport, HarvestError, HarvestOptions, Harvester, ProcessReport,
    ShutdownSignal,
};
pub use progress::ProgressSnapshot;
