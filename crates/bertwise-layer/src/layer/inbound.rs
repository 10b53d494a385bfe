//! Inbound paths: uploads arriving from peers, follow-up block requests,
//! and the client side of blockwise downloads.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use bertwise_core::{
    body::SharedBody,
    constants::{BERT_SUB_BLOCK_SIZE, BERT_SZX},
};
use bertwise_protocol::{BlockOption, Code, Request, Response};

use crate::{
    block2::Block2Status, exchange::Exchange, key::TransferKey, Block1Status,
};

use super::BlockwiseLayer;

impl BlockwiseLayer {
    /// Entry point for every request arriving from the lower layer.
    ///
    /// Requests carrying Block1 feed an upload tracker; a Block2 option
    /// with `num > 0` asks for the next block of an ongoing download and
    /// is served from the matching tracker. Everything else goes straight
    /// up.
    pub fn receive_request(&self, exchange: &mut Exchange, request: Request, now: Instant) {
        if let Some(block2) = request.options().block2() {
            if block2.num() > 0 {
                let key = self.request_key(exchange, &request);
                if let Some(status) = self.registry().block2(&key) {
                    self.handle_inbound_request_for_next_block(
                        exchange, &request, &key, &status, now,
                    );
                    return;
                }
                // No ongoing transfer: let the resource produce the body,
                // the response path crops it to the requested block.
            }
        }

        if request.options().block1().is_some() {
            self.handle_inbound_blockwise_upload(exchange, request, now);
            return;
        }

        self.upper().receive_request(exchange, request);
    }

    /// Handles one block of an upload from a peer, for both plain and BERT
    /// size exponents.
    fn handle_inbound_blockwise_upload(
        &self,
        exchange: &mut Exchange,
        request: Request,
        now: Instant,
    ) {
        if self.request_exceeds_max_body_size(&request) {
            tracing::warn!(
                "peer declared body of {:?} bytes, exceeding the cap of {}, responding with 4.13",
                request.options().size1(),
                self.max_resource_body_size()
            );
            let mut response = Response::create_for(&request, Code::RequestEntityTooLarge);
            response.options_mut().set_size1(self.max_resource_body_size() as u32);
            response.set_payload(SharedBody::from_vec(b"body too large".to_vec()));
            exchange.set_current_response(response.clone());
            self.lower().send_response(exchange, response);
            return;
        }

        let Some(block1) = request.options().block1() else {
            self.upper().receive_request(exchange, request);
            return;
        };

        let key = self.request_key(exchange, &request);
        let created = self.registry().get_or_create_block1(&key, || {
            Block1Status::inbound(&request, self.max_resource_body_size(), now)
        });
        let status_arc = match created {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!("cannot track upload from {}: {}", exchange.peer(), error);
                let mut response =
                    Response::create_for(&request, Code::RequestEntityIncomplete);
                response.set_payload(SharedBody::from_vec(
                    b"too many concurrent blockwise transfers".to_vec(),
                ));
                exchange.set_current_response(response.clone());
                self.lower().send_response(exchange, response);
                return;
            }
        };

        // A peer starting over at block zero abandons the partial body.
        let restarted = {
            let status = status_arc.lock().expect("status lock poisoned");
            block1.num() == 0 && status.current_num() > 0
        };
        let status_arc = if restarted {
            tracing::debug!("peer restarted upload for {:?}", key);
            match self.registry().reset_block1(
                &key,
                Block1Status::inbound(&request, self.max_resource_body_size(), now),
            ) {
                Ok(status) => status,
                Err(_) => status_arc,
            }
        } else {
            status_arc
        };

        let mut status = status_arc.lock().expect("status lock poisoned");

        if block1.num() != status.current_num() {
            tracing::warn!(
                "peer sent wrong block, expected no. {} but got {}, responding with 4.08 \
                 (Request Entity Incomplete)",
                status.current_num(),
                block1.num()
            );
            drop(status);
            self.send_block1_error_response(
                &key,
                &status_arc,
                exchange,
                &request,
                Code::RequestEntityIncomplete,
                "wrong block number".to_string(),
            );
        } else if !status.has_content_format(request.options().content_format()) {
            drop(status);
            self.send_block1_error_response(
                &key,
                &status_arc,
                exchange,
                &request,
                Code::RequestEntityIncomplete,
                "unexpected Content-Format".to_string(),
            );
        } else if !status.add_block(request.payload().as_slice()) {
            let diagnostic =
                format!("body exceeded expected size {}", status.buffer_size());
            drop(status);
            self.send_block1_error_response(
                &key,
                &status_arc,
                exchange,
                &request,
                Code::RequestEntityTooLarge,
                diagnostic,
            );
        } else {
            let advance = if block1.is_bert() {
                (request.payload().len() / BERT_SUB_BLOCK_SIZE).max(1) as u32
            } else {
                1
            };
            let new_num = status.current_num() + advance;
            status.set_current_num(new_num);
            status.touch(now);

            if block1.m() {
                tracing::debug!(
                    "acknowledging incoming block1 [num={}], expecting more blocks to come",
                    block1.num()
                );
                drop(status);
                let mut piggyback = Response::create_for(&request, Code::Continue);
                piggyback
                    .options_mut()
                    .set_block1(BlockOption::new(block1.szx(), true, block1.num()));
                exchange.set_current_response(piggyback.clone());
                self.lower().send_response(exchange, piggyback);
            } else {
                tracing::debug!(
                    "peer has sent last block1 [num={}], delivering request to application layer",
                    block1.num()
                );
                // The eventual response acknowledges the completed upload.
                exchange.set_block1_to_ack(block1);

                let assembled = status.assemble(&request);
                drop(status);
                self.registry().remove_block1_if(&key, &status_arc);

                exchange.set_request(assembled.clone());
                self.upper().receive_request(exchange, assembled);
            }
        }
    }

    /// Serves the next block(s) of an ongoing outbound download. A BERT
    /// request is answered with up to `bert_step_size` sub-blocks bulked
    /// into a single response.
    fn handle_inbound_request_for_next_block(
        &self,
        exchange: &mut Exchange,
        request: &Request,
        key: &TransferKey,
        status_arc: &Arc<Mutex<Block2Status>>,
        now: Instant,
    ) {
        let Some(requested) = request.options().block2() else {
            return;
        };

        let (mut response, transfer_complete) = {
            let mut status = status_arc.lock().expect("status lock poisoned");

            let served = if requested.is_bert() {
                self.next_bert_response(&mut status, requested)
            } else {
                status.next_response_block(requested)
            };
            let block = match served {
                Ok(block) => block,
                Err(error) => {
                    tracing::warn!(
                        "peer requested block {} beyond the body: {}",
                        requested.num(),
                        error
                    );
                    drop(status);
                    self.registry().remove_block2_if(key, status_arc);
                    let mut response = Response::create_for(request, Code::BadOption);
                    response.options_mut().set_block2(requested);
                    exchange.set_current_response(response.clone());
                    self.lower().send_response(exchange, response);
                    return;
                }
            };

            let complete = status.is_complete();
            if !complete {
                status.touch(now);
            }
            (block, complete)
        };

        if transfer_complete {
            tracing::debug!("peer has requested last block of blockwise transfer");
            self.registry().remove_block2_if(key, status_arc);
        } else {
            tracing::debug!("peer has requested intermediary block of blockwise transfer");
        }

        // Answer the request actually on the wire.
        response.set_mid(request.mid());
        response.set_token(request.token().clone());
        if let Some(source) = request.source() {
            response.set_destination(source);
        }

        exchange.set_current_response(response.clone());
        self.lower().send_response(exchange, response);
    }

    /// Pulls up to `bert_step_size` sub-blocks from the tracker and bulks
    /// them into one response labelled with the originally requested
    /// number.
    pub(crate) fn next_bert_response(
        &self,
        status: &mut Block2Status,
        requested: BlockOption,
    ) -> bertwise_core::error::Result<Response> {
        let mut builder: Vec<u8> =
            Vec::with_capacity(self.bert_step_size() * BERT_SUB_BLOCK_SIZE);
        let requested_num = requested.num();
        let mut current_num = requested_num;
        let mut block2 = requested;
        let mut has_next = true;
        let mut first = None;

        for _ in 0..self.bert_step_size() {
            if !has_next {
                break;
            }
            let block = status.next_response_block(block2)?;
            has_next = block.options().block2().is_some_and(|b| b.m());
            current_num += 1;
            block2 = BlockOption::new(BERT_SZX, has_next, current_num);
            builder.extend_from_slice(block.payload().as_slice());
            if first.is_none() {
                first = Some(block);
            }
        }

        let mut response = first.expect("the step size is at least one");
        response.set_payload(SharedBody::from_vec(builder));
        response
            .options_mut()
            .set_block2(BlockOption::new(BERT_SZX, has_next, requested_num));
        Ok(response)
    }

    /// Entry point for every response arriving from the lower layer.
    pub fn receive_response(&self, exchange: &mut Exchange, response: Response, now: Instant) {
        let key = self.exchange_key(exchange);

        if response.code() == Code::Continue {
            // The peer acknowledged an intermediary upload block.
            if let (Some(block1), Some(status)) =
                (response.options().block1(), self.registry().block1(&key))
            {
                if block1.m() {
                    self.send_next_block(exchange, &response, &key, &status, now);
                    return;
                }
            }
            tracing::debug!("received 2.31 Continue without a matching transfer, ignoring");
            return;
        }

        if response.code().is_error() {
            // Any error terminates the transfers held under this key.
            self.registry().remove_block1(&key);
            if let Some(status) = self.registry().remove_block2(&key) {
                status.lock().expect("status lock poisoned").cancel();
            }
            self.upper().receive_response(exchange, response);
            return;
        }

        if response.options().block1().is_some() {
            // Final response of a completed upload.
            self.registry().remove_block1(&key);
        }

        if let Some(block2) = response.options().block2() {
            self.handle_block2_response(exchange, response, &key, block2, now);
            return;
        }

        self.upper().receive_response(exchange, response);
    }

    /// Feeds one received block of a download into its tracker, requesting
    /// the next block or delivering the assembled body.
    fn handle_block2_response(
        &self,
        exchange: &mut Exchange,
        response: Response,
        key: &TransferKey,
        block2: BlockOption,
        now: Instant,
    ) {
        let created = self.registry().get_or_create_block2(key, || {
            Block2Status::inbound(&response, self.max_resource_body_size(), now)
        });
        let mut status_arc = match created {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(
                    "cannot track blockwise response from {}: {}, delivering as-is",
                    exchange.peer(),
                    error
                );
                self.upper().receive_response(exchange, response);
                return;
            }
        };

        // Explicit block requests are delivered without reassembly.
        let random_access = {
            let status = status_arc.lock().expect("status lock poisoned");
            status.is_random_access()
        };
        if random_access {
            self.registry().remove_block2_if(key, &status_arc);
            self.upper().receive_response(exchange, response);
            return;
        }

        // A changed representation restarts the download from scratch.
        let stale = {
            let status = status_arc.lock().expect("status lock poisoned");
            !status.matches_etag(response.options().etag())
        };
        if stale {
            tracing::debug!("ETag changed mid-transfer, restarting download");
            status_arc.lock().expect("status lock poisoned").cancel();
            match self.registry().reset_block2(
                key,
                Block2Status::inbound(&response, self.max_resource_body_size(), now),
            ) {
                Ok(status) => status_arc = status,
                Err(_) => {
                    self.upper().receive_response(exchange, response);
                    return;
                }
            }
            if block2.num() != 0 {
                // The fresh tracker expects block zero again.
                self.request_next_block(exchange, &response, key, &status_arc, now);
                return;
            }
        }

        let mut deliver = None;
        {
            let mut status = status_arc.lock().expect("status lock poisoned");

            if block2.num() != status.current_num() {
                tracing::warn!(
                    "discarding response block, expected no. {} but got {}",
                    status.current_num(),
                    block2.num()
                );
                return;
            }

            if !status.add_block(response.payload().as_slice()) {
                tracing::warn!(
                    "response body exceeds the maximum of {} bytes, cancelling download",
                    self.max_resource_body_size()
                );
                status.cancel();
                drop(status);
                self.registry().remove_block2_if(key, &status_arc);
                return;
            }

            let advance = (response.payload().len() / block2.stride()).max(1) as u32;
            status.set_current_num(block2.num() + advance);
            status.touch(now);

            if !block2.m() {
                deliver = Some(status.assemble(&response));
            }
        }

        if let Some(assembled) = deliver {
            tracing::debug!(
                "blockwise download of {} bytes complete, delivering to application layer",
                assembled.payload().len()
            );
            self.registry().remove_block2_if(key, &status_arc);
            self.upper().receive_response(exchange, assembled);
            return;
        }

        self.request_next_block(exchange, &response, key, &status_arc, now);
    }
}
