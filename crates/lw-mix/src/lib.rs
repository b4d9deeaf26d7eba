//! lw-mix: layered public-key onion routing between mesh peers.
//!
//! The originator wraps a final envelope in one AEAD layer per hop, each
//! keyed by an X25519 exchange between a fresh ephemeral scalar and that
//! hop's advertised public key. Every hop peels exactly one layer and
//! learns only its predecessor and successor.

pub mod onion;
pub mod path;

pub use onion::{build_onion, new_msgid, peel, text_key, PeeledLayer};
pub use path::{choose_hops, xor_distance, Hop};

/// Default maximum path length (intermediates + destination).
pub const DEFAULT_MAX_HOPS: usize = 4;

/// TTL stamped into each layer at build time.
pub const DEFAULT_TTL: i32 = 8;

/// Relay forwarding jitter bounds, milliseconds.
pub const JITTER_MIN_MS: u64 = 100;
pub const JITTER_MAX_MS: u64 = 600;
