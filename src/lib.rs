pub mod airtable;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod progress;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::SyncError;
pub use sync::{SyncPipeline, SyncReport};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Installs the global logger; `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,reqwest=warn,hyper=warn"),
        )
        .init();
    });
}
