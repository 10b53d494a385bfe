use std::net::SocketAddr;

use bertwise_protocol::{BlockOption, Request, Response};

/// Context of one logical request/response pair as it travels the stack.
///
/// The blockwise layer reads and updates a handful of fields; everything
/// else about an exchange belongs to the surrounding endpoint.
#[derive(Debug)]
pub struct Exchange {
    peer: SocketAddr,
    request: Request,
    current_request: Option<Request>,
    current_response: Option<Response>,
    block1_to_ack: Option<BlockOption>,
    notification: bool,
}

impl Exchange {
    /// Creates an exchange with `request` as its logical request.
    pub fn new(peer: SocketAddr, request: Request) -> Self {
        Self {
            peer,
            request,
            current_request: None,
            current_response: None,
            block1_to_ack: None,
            notification: false,
        }
    }

    /// The peer this exchange is held with.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The logical request of the exchange. For an inbound blockwise upload
    /// this is replaced with the assembled request on completion.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Replaces the logical request.
    pub fn set_request(&mut self, request: Request) {
        self.request = request;
    }

    /// The block request most recently put on the wire.
    pub fn current_request(&self) -> Option<&Request> {
        self.current_request.as_ref()
    }

    /// Records the block request being put on the wire.
    pub fn set_current_request(&mut self, request: Request) {
        self.current_request = Some(request);
    }

    /// The block response most recently put on the wire.
    pub fn current_response(&self) -> Option<&Response> {
        self.current_response.as_ref()
    }

    /// Records the block response being put on the wire.
    pub fn set_current_response(&mut self, response: Response) {
        self.current_response = Some(response);
    }

    /// Remembers the final Block1 option so the application's response can
    /// acknowledge the completed upload.
    pub fn set_block1_to_ack(&mut self, block: BlockOption) {
        self.block1_to_ack = Some(block);
    }

    /// Takes the pending Block1 acknowledgement, clearing the slot.
    pub fn take_block1_to_ack(&mut self) -> Option<BlockOption> {
        self.block1_to_ack.take()
    }

    /// True when the exchange tracks an observe notification.
    pub fn is_notification(&self) -> bool {
        self.notification
    }

    /// Marks the exchange as tracking an observe notification.
    pub fn set_notification(&mut self, notification: bool) {
        self.notification = notification;
    }
}
