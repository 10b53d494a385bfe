use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use bertwise_core::{body::SharedBody, config::Config, error::ErrorKind};
use bertwise_protocol::{BlockOption, Code, MessageObserver, Request, Response};

use crate::{
    block1::Block1Status,
    block2::Block2Status,
    exchange::Exchange,
    key::TransferKey,
    registry::TransferRegistry,
};

mod inbound;
mod outbound;

/// Upward contract: the application/matcher side of the stack.
///
/// Each callback fires once per fully assembled message.
pub trait UpperLayer: Send + Sync {
    /// A fully assembled request is ready for the application.
    fn receive_request(&self, exchange: &mut Exchange, request: Request);
    /// A fully assembled response is ready for the application.
    fn receive_response(&self, exchange: &mut Exchange, response: Response);
}

/// Downward contract: message serialization and transport.
///
/// Both calls hand the message off synchronously and never suspend.
pub trait LowerLayer: Send + Sync {
    /// Puts a (block) request on the wire.
    fn send_request(&self, exchange: &mut Exchange, request: Request);
    /// Puts a (block) response on the wire.
    fn send_response(&self, exchange: &mut Exchange, response: Response);
}

/// The blockwise-transfer state machine.
///
/// One instance serves every exchange of an endpoint. The base machine
/// speaks plain RFC 7959 (`SZX <= 6`); with `number_of_bulk_blocks > 1`
/// outbound bodies are bulked into BERT blocks of several 1024-byte
/// sub-blocks each (`SZX = 7`). Inbound BERT blocks are handled
/// irrespective of that setting.
///
/// The layer performs no I/O itself and holds no clock; callers pass the
/// current time into every entry point, and the embedding host drives
/// [`BlockwiseLayer::cleanup_expired`] from its periodic tick.
pub struct BlockwiseLayer {
    max_message_size: usize,
    preferred_szx: u8,
    max_resource_body_size: usize,
    bert_step_size: usize,
    bert_enabled: bool,
    registry: Arc<TransferRegistry>,
    upper: Arc<dyn UpperLayer>,
    lower: Arc<dyn LowerLayer>,
}

impl BlockwiseLayer {
    /// Creates a layer wired to its neighbours.
    pub fn new(config: &Config, upper: Arc<dyn UpperLayer>, lower: Arc<dyn LowerLayer>) -> Self {
        let bert_step_size = config.number_of_bulk_blocks.max(1);
        Self {
            max_message_size: config.max_message_size,
            preferred_szx: BlockOption::szx_for_size(config.preferred_block_size),
            max_resource_body_size: config.max_resource_body_size,
            bert_step_size,
            bert_enabled: bert_step_size > 1,
            registry: Arc::new(TransferRegistry::new(
                config.blockwise_status_lifetime,
                config.max_active_transfers,
            )),
            upper,
            lower,
        }
    }

    /// The registry of live transfers, for host introspection.
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Drops every transfer that idled past its lifetime, notifying its
    /// observers. Returns the number of transfers dropped.
    pub fn cleanup_expired(&self, now: Instant) -> usize {
        self.registry.cleanup_expired(now)
    }

    /// Transparent blockwise handling is on unless reassembly is disabled.
    pub(crate) fn transparent_blockwise(&self) -> bool {
        self.max_resource_body_size > 0
    }

    pub(crate) fn requires_blockwise_request(&self, request: &Request) -> bool {
        request.payload().len() > self.max_message_size
    }

    /// A response body goes blockwise when it exceeds the message size
    /// threshold or the peer negotiated a smaller block size up front.
    pub(crate) fn requires_blockwise_response(
        &self,
        response: &Response,
        request_block2: Option<BlockOption>,
    ) -> bool {
        let len = response.payload().len();
        if len > self.max_message_size {
            return true;
        }
        match request_block2 {
            Some(block) if !block.is_bert() => len > BlockOption::size_of(block.szx()),
            _ => false,
        }
    }

    /// A request whose declared body size already exceeds the reassembly
    /// cap is refused before any block is buffered.
    pub(crate) fn request_exceeds_max_body_size(&self, request: &Request) -> bool {
        request
            .options()
            .size1()
            .is_some_and(|size| size as usize > self.max_resource_body_size)
    }

    pub(crate) fn max_resource_body_size(&self) -> usize {
        self.max_resource_body_size
    }

    pub(crate) fn bert_step_size(&self) -> usize {
        self.bert_step_size
    }

    pub(crate) fn bert_enabled(&self) -> bool {
        self.bert_enabled
    }

    pub(crate) fn preferred_szx(&self) -> u8 {
        self.preferred_szx
    }

    /// Key of the transfer `request` belongs to, held with the exchange
    /// peer.
    pub(crate) fn request_key(&self, exchange: &Exchange, request: &Request) -> TransferKey {
        TransferKey::new(exchange.peer(), request)
    }

    /// Key of the transfer the exchange's logical request belongs to.
    pub(crate) fn exchange_key(&self, exchange: &Exchange) -> TransferKey {
        TransferKey::new(exchange.peer(), exchange.request())
    }

    pub(crate) fn upper(&self) -> &dyn UpperLayer {
        &*self.upper
    }

    pub(crate) fn lower(&self) -> &dyn LowerLayer {
        &*self.lower
    }

    /// Builds the cleanup observer for an outbound upload's block request.
    pub(crate) fn block1_cleanup_observer(
        &self,
        key: TransferKey,
        status: Arc<Mutex<Block1Status>>,
    ) -> Arc<dyn MessageObserver> {
        Arc::new(Block1CleanupObserver { registry: self.registry.clone(), key, status })
    }

    /// Builds the cleanup observer for an outbound download's block
    /// request.
    pub(crate) fn block2_cleanup_observer(
        &self,
        key: TransferKey,
        status: Arc<Mutex<Block2Status>>,
    ) -> Arc<dyn MessageObserver> {
        Arc::new(Block2CleanupObserver { registry: self.registry.clone(), key, status })
    }

    /// Tears down a failed upload and answers the offending block with an
    /// error response carrying a diagnostic text.
    pub(crate) fn send_block1_error_response(
        &self,
        key: &TransferKey,
        status: &Arc<Mutex<Block1Status>>,
        exchange: &mut Exchange,
        request: &Request,
        code: Code,
        diagnostic: String,
    ) {
        self.registry.remove_block1_if(key, status);
        let mut response = Response::create_for(request, code);
        response.set_payload(SharedBody::from_vec(diagnostic.into_bytes()));
        exchange.set_current_response(response.clone());
        self.lower.send_response(exchange, response);
    }
}

/// Removes a Block1 tracker from the registry when the block request
/// carrying it fails or times out.
struct Block1CleanupObserver {
    registry: Arc<TransferRegistry>,
    key: TransferKey,
    status: Arc<Mutex<Block1Status>>,
}

impl MessageObserver for Block1CleanupObserver {
    fn on_send_error(&self, _error: &ErrorKind) {
        self.registry.remove_block1_if(&self.key, &self.status);
    }

    fn on_cancel(&self) {
        self.registry.remove_block1_if(&self.key, &self.status);
    }

    fn on_timeout(&self) {
        self.registry.remove_block1_if(&self.key, &self.status);
    }
}

/// Removes a Block2 tracker from the registry when the block request
/// carrying it fails or times out.
struct Block2CleanupObserver {
    registry: Arc<TransferRegistry>,
    key: TransferKey,
    status: Arc<Mutex<Block2Status>>,
}

impl MessageObserver for Block2CleanupObserver {
    fn on_send_error(&self, _error: &ErrorKind) {
        self.registry.remove_block2_if(&self.key, &self.status);
    }

    fn on_cancel(&self) {
        self.registry.remove_block2_if(&self.key, &self.status);
    }

    fn on_timeout(&self) {
        self.registry.remove_block2_if(&self.key, &self.status);
    }
}
