#![warn(missing_docs)]

//! bertwise-protocol: the in-memory CoAP message model the blockwise layer
//! operates on.
//!
//! This crate deliberately stops short of a full CoAP codec. It models the
//! parts of a message the blockwise layer reads and writes: codes, tokens,
//! payloads, the option subset that steers blockwise transfers, and the
//! Block1/Block2 option value codec itself.

/// Block1/Block2 option value codec.
pub mod block;
/// Request method and response codes.
pub mod code;
/// Request and response messages, tokens, and message observers.
pub mod message;
/// The subset of CoAP options the blockwise layer touches.
pub mod option;

pub use block::BlockOption;
pub use code::Code;
pub use message::{MessageObserver, Request, Response, Token};
pub use option::OptionSet;
