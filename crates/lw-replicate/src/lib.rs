//! lw-replicate: encrypt-once fanout of content-addressed blobs.
//!
//! A blob is sealed once at the originator under a fresh artifact key, then
//! the same ciphertext travels the whole mesh; receivers verify its hash,
//! link a block into their chain, persist the ciphertext, and forward once.
//! The same loop-suppression discipline carries broadcast commands.

pub mod command;
pub mod engine;
pub mod escrow;
pub mod seen;
pub mod store;

pub use command::{CommandCenter, CommandReceipt};
pub use engine::{Admission, OriginateOutcome, ReplicationEngine};
pub use escrow::EscrowClient;
pub use seen::SeenSet;
pub use store::BlobCache;

/// Fresh URL-safe 128-bit message id.
pub fn new_msgid() -> String {
    use base64::Engine as _;
    use rand::RngCore;
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}
