//! lw-peers: the live peer directory and its sealed on-disk snapshot.

pub mod directory;
pub mod snapshot;

pub use directory::PeerDirectory;
pub use snapshot::{autosave_loop, load_snapshot, save_snapshot};
