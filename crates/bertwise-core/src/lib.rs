#![warn(missing_docs)]

//! bertwise-core: foundational types for the blockwise-transfer stack.
//!
//! This crate provides the minimal set of utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Reference-counted body buffers with block-oriented slicing
//!
//! Protocol-specific logic lives in the specialized crates:
//! - `bertwise-protocol`: message model, options, Block option codec
//! - `bertwise-layer`: transfer trackers and the blockwise state machine

/// Protocol constants shared across layers.
pub mod constants {
    /// Size exponent reserved for BERT (RFC 8323). A BERT block carries any
    /// number of concatenated sub-blocks instead of a single fixed-size block.
    pub const BERT_SZX: u8 = 7;
    /// Size of one BERT sub-block in bytes. Internally BERT is handled like
    /// SZX = 6, in units of this size.
    pub const BERT_SUB_BLOCK_SIZE: usize = 1024;
    /// Maximum encoded length of a Block1/Block2 option value in bytes.
    pub const MAX_BLOCK_OPTION_LENGTH: usize = 3;
    /// Largest block number representable in the 20-bit NUM field.
    pub const MAX_BLOCK_NUM: u32 = (1 << 20) - 1;
    /// Smallest negotiable block size (SZX = 0).
    pub const MIN_BLOCK_SIZE: usize = 16;
    /// Largest plain block size (SZX = 6).
    pub const MAX_PLAIN_BLOCK_SIZE: usize = 1024;
}

/// Configuration options for the blockwise layer.
pub mod config;
/// Error types and results.
pub mod error;
/// Shared, reference-counted body buffers with zero-copy block slicing.
pub mod body;
