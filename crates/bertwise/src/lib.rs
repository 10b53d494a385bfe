#![warn(missing_docs)]

//! Bertwise: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types to embed blockwise transfers with BERT bulking in
//! a CoAP stack over a reliable transport:
//!
//! - The state machine and its layer contracts (`BlockwiseLayer`,
//!   `UpperLayer`, `LowerLayer`)
//! - The message model (`Request`, `Response`, `OptionSet`, `BlockOption`)
//! - Core configuration (`Config`)
//!
//! Example
//! ```ignore
//! use std::{sync::Arc, time::Instant};
//! use bertwise::{BlockwiseLayer, Config, Exchange, Request, Code};
//!
//! let config = Config { number_of_bulk_blocks: 4, ..Config::default() };
//! let layer = BlockwiseLayer::new(&config, application, transport);
//!
//! // Send a large PUT; the layer splits it into BERT blocks.
//! let mut exchange = Exchange::new(peer, request.clone());
//! layer.send_request(&mut exchange, request, Instant::now());
//!
//! // Drive cleanup from the host's periodic tick.
//! layer.cleanup_expired(Instant::now());
//! ```

// Core config and errors
pub use bertwise_core::{
    body::SharedBody,
    config::Config,
    error::{DecodingErrorKind, ErrorKind, TransferErrorKind},
};
// Layer: the state machine, contracts, and per-exchange context
pub use bertwise_layer::{
    BlockwiseLayer, Exchange, LowerLayer, TransferKey, TransferRegistry, UpperLayer,
};
// Protocol: messages and options
pub use bertwise_protocol::{
    BlockOption, Code, MessageObserver, OptionSet, Request, Response, Token,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        BlockOption, BlockwiseLayer, Code, Config, ErrorKind, Exchange, LowerLayer,
        MessageObserver, OptionSet, Request, Response, SharedBody, Token, UpperLayer,
    };
}
