// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{
    DEFAULT_CLAIM_BATCH, Settings, batch_mode, chromium_options, lookup_entry, remove_database,
    resolve_settings, stats_line,
};
