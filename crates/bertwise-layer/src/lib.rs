#![warn(missing_docs)]

//! bertwise-layer: the blockwise-transfer state machine.
//!
//! The layer sits between an upper layer (application, observe handling,
//! matcher) and a lower layer (message serialization, transport). It
//! fragments oversized outbound bodies into Block1/Block2 sequences,
//! reassembles inbound sequences, serves random block access, and garbage
//! collects abandoned transfers. With `number_of_bulk_blocks > 1` it bulks
//! several 1024-byte sub-blocks into each on-wire block (BERT, RFC 8323)
//! while staying wire-compatible with plain RFC 7959 peers.

/// Per-direction transfer trackers for uploads (Block1).
pub mod block1;
/// Per-direction transfer trackers for downloads (Block2).
pub mod block2;
/// Per-exchange context carried between layers.
pub mod exchange;
/// Transfer identity derived from peer, token, and URI.
pub mod key;
mod layer;
/// Concurrent mapping of live transfers with deadline-driven cleanup.
pub mod registry;

pub use block1::Block1Status;
pub use block2::Block2Status;
pub use exchange::Exchange;
pub use key::TransferKey;
pub use layer::{BlockwiseLayer, LowerLayer, UpperLayer};
pub use registry::TransferRegistry;
