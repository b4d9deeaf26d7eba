//! lw-core: shared foundation for the LanWeave mesh
//!
//! Holds the pieces every other crate needs: the configuration record, the
//! error taxonomy, the wire types exchanged between nodes, the on-disk
//! layout, and the structured event channel.

pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod types;

pub use config::NodeConfig;
pub use error::{LwError, LwResult};
pub use events::{EventBus, NodeEvent};
pub use paths::StoragePaths;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
