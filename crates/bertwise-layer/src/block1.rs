use std::{mem, sync::Arc, time::Instant};

use bertwise_core::{
    body::SharedBody,
    constants::{BERT_SUB_BLOCK_SIZE, BERT_SZX},
    error::{Result, TransferErrorKind},
};
use bertwise_protocol::{BlockOption, MessageObserver, Request};

/// Tracks one Block1 transfer: an upload of a request body.
///
/// The tracker works in one of two orientations. Inbound, it assembles the
/// blocks a peer uploads to us, enforcing the buffer cap and a fixed
/// Content-Format. Outbound, it holds the full body we are uploading and
/// mints one block request at a time from a template of the original
/// request.
pub struct Block1Status {
    /// Bytes assembled so far (inbound orientation).
    buffer: Vec<u8>,
    /// The complete body being sliced into blocks (outbound orientation).
    source: Option<SharedBody>,
    /// Inbound: the first block request, providing the options of the
    /// assembled request. Outbound: the original request, providing the
    /// shape of every minted block.
    template: Option<Request>,
    current_num: u32,
    szx: u8,
    content_format: Option<u16>,
    buffer_size: usize,
    complete: bool,
    /// Last mutation, for cleanup sweeps.
    touched: Instant,
    observers: Vec<Arc<dyn MessageObserver>>,
}

impl Block1Status {
    /// Creates a tracker assembling an upload from a peer, capped at
    /// `buffer_size` bytes. `request` must be the first block of the
    /// transfer; its Content-Format is pinned for all later blocks.
    pub fn inbound(request: &Request, buffer_size: usize, now: Instant) -> Self {
        let mut template = request.clone();
        template.set_payload(SharedBody::empty());
        let szx = request.options().block1().map_or(6, |block| block.szx());
        Self {
            buffer: Vec::new(),
            source: None,
            template: Some(template),
            current_num: 0,
            szx,
            content_format: request.options().content_format(),
            buffer_size,
            complete: false,
            touched: now,
            observers: Vec::new(),
        }
    }

    /// Creates a tracker uploading `request`'s body blockwise at the given
    /// size exponent. The request's observers ride along so transfer
    /// failures reach them.
    pub fn outbound(request: &Request, szx: u8, now: Instant) -> Self {
        let source = request.payload().clone();
        let mut template = request.clone();
        template.set_payload(SharedBody::empty());
        Self {
            buffer: Vec::new(),
            buffer_size: source.len(),
            source: Some(source),
            template: Some(template),
            current_num: 0,
            szx,
            content_format: request.options().content_format(),
            complete: false,
            touched: now,
            observers: request.observers().to_vec(),
        }
    }

    /// Next block index expected (inbound) or most recently minted
    /// (outbound).
    pub fn current_num(&self) -> u32 {
        self.current_num
    }

    /// Overrides the block counter.
    pub fn set_current_num(&mut self, num: u32) {
        self.current_num = num;
    }

    /// The negotiated size exponent.
    pub fn szx(&self) -> u8 {
        self.szx
    }

    /// Maximum body size this tracker accepts or carries.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// True once the transfer finished.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True when the tracker's pinned Content-Format matches `format`.
    pub fn has_content_format(&self, format: Option<u16>) -> bool {
        self.content_format == format
    }

    /// Appends one block payload to the assembly buffer. Returns false when
    /// the body would exceed the buffer cap; the buffer is left untouched.
    pub fn add_block(&mut self, payload: &[u8]) -> bool {
        if self.buffer.len() + payload.len() > self.buffer_size {
            return false;
        }
        self.buffer.extend_from_slice(payload);
        true
    }

    /// Bytes assembled so far.
    pub fn assembled_len(&self) -> usize {
        self.buffer.len()
    }

    /// Builds the fully assembled request. Options come from the first
    /// block; MID, token, scheme, and addressing come from `last` so the
    /// application's response answers the message actually on the wire.
    /// Any early Block2 negotiation of the peer is preserved.
    pub fn assemble(&mut self, last: &Request) -> Request {
        let mut assembled =
            self.template.take().unwrap_or_else(|| Request::new(last.code()));
        assembled.options_mut().clear_block1();
        assembled.set_payload(SharedBody::from_vec(mem::take(&mut self.buffer)));
        assembled.set_mid(last.mid());
        assembled.set_token(last.token().clone());
        assembled.set_scheme(last.scheme());
        if let Some(source) = last.source() {
            assembled.set_source(source);
        }
        if let Some(block2) = last.options().block2() {
            assembled.options_mut().set_block2(block2);
        }
        self.complete = true;
        assembled
    }

    /// Mints the block request at the tracker's current position.
    pub fn next_request_block(&mut self) -> Result<Request> {
        self.next_request_block_at(self.current_num, self.szx)
    }

    /// Mints the block request at `num` with size exponent `szx`. For BERT
    /// the position counts 1024-byte sub-blocks. The first block carries a
    /// Size1 hint with the full body length.
    pub fn next_request_block_at(&mut self, num: u32, szx: u8) -> Result<Request> {
        let source =
            self.source.as_ref().ok_or(TransferErrorKind::WrongOrientation)?;
        let template =
            self.template.as_ref().ok_or(TransferErrorKind::WrongOrientation)?;

        let stride = if szx == BERT_SZX {
            BERT_SUB_BLOCK_SIZE
        } else {
            BlockOption::size_of(szx)
        };
        let payload =
            source.block(num, stride).ok_or(TransferErrorKind::UnknownBlock)?;
        let more = source.more_after(num, stride);

        let mut block = template.clone();
        if num == 0 {
            block.options_mut().set_size1(source.len() as u32);
        }
        block.options_mut().set_block1(BlockOption::new(szx, more, num));
        block.set_payload(payload);

        self.current_num = num;
        if !more {
            self.complete = true;
        }
        Ok(block)
    }

    /// Last mutation time, for the cleanup sweep.
    pub fn touched(&self) -> Instant {
        self.touched
    }

    /// Re-arms the cleanup deadline.
    pub fn touch(&mut self, now: Instant) {
        self.touched = now;
    }

    /// Registers an observer to be told about the transfer's fate.
    pub fn add_observer(&mut self, observer: Arc<dyn MessageObserver>) {
        self.observers.push(observer);
    }

    /// Observers riding on this transfer.
    pub fn observers(&self) -> &[Arc<dyn MessageObserver>] {
        &self.observers
    }
}
