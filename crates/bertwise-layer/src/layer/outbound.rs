//! Outbound paths: starting uploads and downloads, continuing an upload
//! after an acknowledgement, requesting download blocks, and random block
//! access.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use bertwise_core::{
    body::SharedBody,
    constants::{BERT_SUB_BLOCK_SIZE, BERT_SZX},
    error::Result,
};
use bertwise_protocol::{BlockOption, Code, Request, Response};

use crate::{
    block1::Block1Status, block2::Block2Status, exchange::Exchange, key::TransferKey,
};

use super::BlockwiseLayer;

impl BlockwiseLayer {
    /// Entry point for every request the upper layer sends.
    ///
    /// Oversized bodies are turned into a blockwise upload; an explicit
    /// Block2 option with `num > 0` is treated as random access. A new
    /// request for a resource with an ongoing download abandons that
    /// download first, since a single endpoint cannot run two Block2
    /// transfers against the same resource (RFC 7959, section 2.4).
    pub fn send_request(&self, exchange: &mut Exchange, request: Request, now: Instant) {
        if !self.transparent_blockwise() {
            exchange.set_current_request(request.clone());
            self.lower().send_request(exchange, request);
            return;
        }

        if let Some(block2) = request.options().block2() {
            // A block number of zero is not random access: the caller may
            // only want early block size negotiation for the full body.
            if block2.num() > 0 {
                tracing::debug!(
                    "outbound request contains block2 option, creating random-access status"
                );
                let key = self.request_key(exchange, &request);
                if let Err(error) =
                    self.registry().reset_block2(&key, Block2Status::random_access(block2, now))
                {
                    tracing::warn!("cannot track random block access: {}", error);
                    let mut request = request;
                    request.set_send_error(error);
                    return;
                }
                if self.bert_enabled() {
                    self.handle_random_block_access(exchange, request, block2.num(), now);
                } else {
                    exchange.set_current_request(request.clone());
                    self.lower().send_request(exchange, request);
                }
                return;
            }
        }

        let key = self.request_key(exchange, &request);
        if let Some(old) = self.registry().remove_block2(&key) {
            tracing::debug!(
                "new request preempts the ongoing blockwise transfer for {:?}",
                key
            );
            old.lock().expect("status lock poisoned").cancel();
        }

        if self.requires_blockwise_request(&request) {
            self.start_blockwise_upload(exchange, request, now);
            return;
        }

        exchange.set_current_request(request.clone());
        self.lower().send_request(exchange, request);
    }

    /// Starts uploading `request`'s body blockwise, putting the first
    /// (possibly bulked) block on the wire.
    fn start_blockwise_upload(&self, exchange: &mut Exchange, request: Request, now: Instant) {
        tracing::debug!(
            "request body of {} bytes requires blockwise transfer",
            request.payload().len()
        );

        let key = self.request_key(exchange, &request);
        let szx = if self.bert_enabled() { BERT_SZX } else { self.preferred_szx() };
        let status_arc = match self
            .registry()
            .reset_block1(&key, Block1Status::outbound(&request, szx, now))
        {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!("cannot start blockwise upload: {}", error);
                let mut request = request;
                request.set_send_error(error);
                return;
            }
        };

        let minted = {
            let mut status = status_arc.lock().expect("status lock poisoned");
            let result = if self.bert_enabled() {
                self.next_bert_request(&mut status, 0)
            } else {
                status.next_request_block_at(0, szx)
            };
            if result.is_ok() {
                status.touch(now);
            }
            result
        };

        match minted {
            Ok(mut first) => {
                first.add_observer(self.block1_cleanup_observer(key, status_arc.clone()));
                exchange.set_current_request(first.clone());
                self.lower().send_request(exchange, first);
            }
            Err(error) => {
                tracing::warn!("cannot mint first block, aborting request: {}", error);
                self.registry().remove_block1_if(&key, &status_arc);
                let mut request = request;
                request.set_send_error(error);
            }
        }
    }

    /// Mints up to `bert_step_size` sub-blocks starting at `start_num` and
    /// bulks them into one request labelled `Block1 = (7, m, start_num)`.
    fn next_bert_request(&self, status: &mut Block1Status, start_num: u32) -> Result<Request> {
        let mut builder: Vec<u8> =
            Vec::with_capacity(self.bert_step_size() * BERT_SUB_BLOCK_SIZE);
        let mut num = start_num;
        let mut has_next = true;
        let mut first = None;

        for _ in 0..self.bert_step_size() {
            if !has_next {
                break;
            }
            let block = status.next_request_block_at(num, BERT_SZX)?;
            has_next = block.options().block1().is_some_and(|b| b.m());
            builder.extend_from_slice(block.payload().as_slice());
            num += 1;
            if first.is_none() {
                first = Some(block);
            }
        }

        let mut request = first.expect("the step size is at least one");
        request.set_payload(SharedBody::from_vec(builder));
        request
            .options_mut()
            .set_block1(BlockOption::new(BERT_SZX, has_next, start_num));
        Ok(request)
    }

    /// Continues an upload after the peer acknowledged an intermediary
    /// block with 2.31 Continue.
    pub(crate) fn send_next_block(
        &self,
        exchange: &mut Exchange,
        response: &Response,
        key: &TransferKey,
        status_arc: &Arc<Mutex<Block1Status>>,
        now: Instant,
    ) {
        let minted = {
            let mut status = status_arc.lock().expect("status lock poisoned");
            let next_num = status.current_num() + 1;
            tracing::debug!("sending next Block1 num={}", next_num);
            let result = if self.bert_enabled() {
                self.next_bert_request(&mut status, next_num)
            } else {
                let szx = status.szx();
                status.next_request_block_at(next_num, szx)
            };
            if result.is_ok() {
                status.touch(now);
            }
            result
        };

        match minted {
            Ok(mut block) => {
                // Reuse the token to ease traceability.
                block.set_token(response.token().clone());
                if let Some(source) = response.source() {
                    block.set_destination(source);
                }
                block.add_observer(
                    self.block1_cleanup_observer(key.clone(), status_arc.clone()),
                );
                exchange.set_current_request(block.clone());
                self.lower().send_request(exchange, block);
            }
            Err(error) => {
                tracing::warn!("cannot process next block request, aborting request: {}", error);
                let mut original = exchange.request().clone();
                original.set_send_error(error);
                exchange.set_request(original);
            }
        }
    }

    /// Asks the server for the next block of an ongoing download.
    pub(crate) fn request_next_block(
        &self,
        exchange: &mut Exchange,
        response: &Response,
        key: &TransferKey,
        status_arc: &Arc<Mutex<Block2Status>>,
        now: Instant,
    ) {
        let original = exchange.request().clone();
        let mut block = Request::new(original.code());
        *block.options_mut() = original.options().clone();
        block.options_mut().clear_block1();
        // Block retrieval must not register a new observation.
        block.options_mut().remove_observe();

        let bert = response.options().block2().is_some_and(|b| b.is_bert());
        let next_num = {
            let mut status = status_arc.lock().expect("status lock poisoned");
            let szx = if bert { BERT_SZX } else { status.szx() };
            block.options_mut().set_block2(BlockOption::new(szx, false, status.current_num()));
            status.touch(now);
            status.current_num()
        };

        if !response.is_notification() {
            block.set_token(response.token().clone());
        }
        match response.source() {
            Some(source) => block.set_destination(source),
            None => block.set_destination(exchange.peer()),
        }
        // Failures of the block request reach the original requester and
        // tear the tracker down.
        block.add_observers(original.observers());
        block.add_observer(self.block2_cleanup_observer(key.clone(), status_arc.clone()));

        tracing::debug!("requesting next Block2 [num={}]", next_num);
        exchange.set_current_request(block.clone());
        self.lower().send_request(exchange, block);
    }

    /// Entry point for every response the upper layer sends.
    pub fn send_response(&self, exchange: &mut Exchange, response: Response, now: Instant) {
        let mut response_to_send = response;

        if self.transparent_blockwise() {
            let request_block2 = exchange.request().options().block2();

            match request_block2 {
                Some(requested) if requested.num() > 0 => {
                    response_to_send =
                        self.respond_to_random_access(exchange, response_to_send, requested);
                }
                _ => {
                    if self.requires_blockwise_response(&response_to_send, request_block2) {
                        match self.start_blockwise_download(
                            exchange,
                            response_to_send,
                            request_block2,
                            now,
                        ) {
                            Ok(first) => response_to_send = first,
                            Err(_failed) => {
                                // The send error is recorded on the response
                                // and its observers have been notified.
                                tracing::warn!(
                                    "cannot start blockwise download, dropping response"
                                );
                                return;
                            }
                        }
                    }
                }
            }

            // Acknowledge a completed upload on its final response.
            if let Some(block1) = exchange.take_block1_to_ack() {
                response_to_send.options_mut().set_block1(block1);
            }
        }

        exchange.set_current_response(response_to_send.clone());
        self.lower().send_response(exchange, response_to_send);
    }

    /// Answers a peer's explicit request for one block of a resource.
    ///
    /// A resource aware of blockwise retrieval responds with its own
    /// Block2 option, which only has to match the requested number. A
    /// resource that produced the full body has it cropped here. Asking
    /// for a block beyond the body yields 4.02 Bad Option.
    fn respond_to_random_access(
        &self,
        exchange: &mut Exchange,
        response: Response,
        requested: BlockOption,
    ) -> Response {
        if let Some(served) = response.options().block2() {
            if requested.num() != served.num() {
                tracing::warn!(
                    "resource [{}] implementation error, peer requested block {} but resource \
                     returned block {}",
                    exchange.request().options().uri_path_joined(),
                    requested.num(),
                    served.num()
                );
                let mut error =
                    Response::create_for(exchange.request(), Code::InternalServerError);
                error.set_mid(response.mid());
                error.add_observers(response.observers());
                return error;
            }
            return response;
        }

        let cropped = if self.bert_enabled() {
            self.crop_bert(response.clone(), requested)
        } else {
            let mut out = response.clone();
            Block2Status::crop(&mut out, requested).map(|_| out)
        };

        match cropped {
            Ok(out) => out,
            Err(_) => {
                tracing::debug!(
                    "peer requested non-existing block {}, responding with 4.02",
                    requested.num()
                );
                let mut error = Response::create_for(exchange.request(), Code::BadOption);
                error.set_mid(response.mid());
                error.options_mut().set_block2(requested);
                error.add_observers(response.observers());
                error
            }
        }
    }

    /// Crops up to `bert_step_size` consecutive blocks out of a full-body
    /// response and bulks them into one BERT block.
    fn crop_bert(&self, response: Response, requested: BlockOption) -> Result<Response> {
        let mut builder: Vec<u8> =
            Vec::with_capacity(self.bert_step_size() * BERT_SUB_BLOCK_SIZE);
        let mut num = requested.num();
        let mut has_next = true;

        for _ in 0..self.bert_step_size() {
            if !has_next {
                break;
            }
            let mut piece = response.clone();
            Block2Status::crop(&mut piece, BlockOption::new(requested.szx(), false, num))?;
            has_next = piece.options().block2().is_some_and(|b| b.m());
            builder.extend_from_slice(piece.payload().as_slice());
            num += 1;
        }

        let mut out = response;
        out.set_payload(SharedBody::from_vec(builder));
        out.options_mut()
            .set_block2(BlockOption::new(BERT_SZX, has_next, requested.num()));
        Ok(out)
    }

    /// Starts serving `response`'s body blockwise, returning the first
    /// (possibly bulked) block. The peer may have negotiated the block
    /// size up front with a `num = 0` Block2 option.
    fn start_blockwise_download(
        &self,
        exchange: &mut Exchange,
        response: Response,
        request_block2: Option<BlockOption>,
        now: Instant,
    ) -> std::result::Result<Response, Response> {
        let key = self.exchange_key(exchange);
        let szx = if self.bert_enabled() {
            BERT_SZX
        } else {
            match request_block2 {
                Some(block) if !block.is_bert() => block.szx().min(self.preferred_szx()),
                _ => self.preferred_szx(),
            }
        };

        // A newer representation abandons the transfer still in flight,
        // for example when notifications outpace the download.
        if let Some(old) = self.registry().remove_block2(&key) {
            old.lock().expect("status lock poisoned").cancel();
        }

        let status_arc = match self
            .registry()
            .reset_block2(&key, Block2Status::outbound(&response, szx, now))
        {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!("cannot track blockwise download: {}", error);
                let mut response = response;
                response.set_send_error(error);
                return Err(response);
            }
        };

        let (minted, complete) = {
            let mut status = status_arc.lock().expect("status lock poisoned");
            let result = if self.bert_enabled() {
                self.next_bert_response(&mut status, BlockOption::new(BERT_SZX, false, 0))
            } else {
                status.next_response_block(BlockOption::new(szx, false, 0))
            };
            if result.is_ok() {
                status.touch(now);
            }
            (result, status.is_complete())
        };

        match minted {
            Ok(first) => {
                if complete {
                    // The whole body fit into the first block.
                    self.registry().remove_block2_if(&key, &status_arc);
                }
                Ok(first)
            }
            Err(error) => {
                self.registry().remove_block2_if(&key, &status_arc);
                let mut response = response;
                response.set_send_error(error);
                Err(response)
            }
        }
    }

    /// Re-emits part of a prior blockwise upload when the caller asks for
    /// a specific block. Without a prior upload there is no body to slice,
    /// so the request is dropped.
    ///
    /// The re-sent request keeps the requested window in its payload while
    /// its Block1 option number stays zero, mirroring the long-standing
    /// behavior of this transfer mode.
    fn handle_random_block_access(
        &self,
        exchange: &mut Exchange,
        request: Request,
        block_num: u32,
        now: Instant,
    ) {
        let key = self.request_key(exchange, &request);
        let Some(status_arc) = self.registry().block1(&key) else {
            tracing::debug!(
                "request {:?} was not sent blockwise, random block access is not possible",
                request
            );
            return;
        };

        let minted = {
            let mut status = status_arc.lock().expect("status lock poisoned");
            let result = self.next_bert_request(&mut status, block_num);
            if result.is_ok() {
                status.touch(now);
            }
            result
        };

        match minted {
            Ok(bulk) => {
                let mut request_to_send = request;
                request_to_send.set_payload(bulk.payload().clone());
                let has_next =
                    bulk.options().block1().is_some_and(|block| block.m());
                request_to_send
                    .options_mut()
                    .set_block1(BlockOption::new(BERT_SZX, has_next, 0));
                exchange.set_current_request(request_to_send.clone());
                self.lower().send_request(exchange, request_to_send);
            }
            Err(error) => {
                tracing::warn!("cannot re-emit blocks for random access: {}", error);
                let mut request = request;
                request.set_send_error(error);
            }
        }
    }
}
