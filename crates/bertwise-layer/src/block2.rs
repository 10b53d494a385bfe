use std::{mem, sync::Arc, time::Instant};

use bertwise_core::{
    body::SharedBody,
    error::{Result, TransferErrorKind},
};
use bertwise_protocol::{BlockOption, MessageObserver, Response};

/// Tracks one Block2 transfer: a download of a response body.
///
/// Outbound, the tracker holds the full representation a resource produced
/// and serves one block response at a time. Inbound, it assembles the
/// blocks a server sends us, guarding freshness with an ETag snapshot.
/// A random-access tracker assembles nothing; it only remembers which
/// block was asked for so the eventual response can be matched.
pub struct Block2Status {
    buffer: Vec<u8>,
    source: Option<SharedBody>,
    template: Option<Response>,
    current_num: u32,
    szx: u8,
    buffer_size: usize,
    /// Representation snapshot taken from the first block.
    etag: Option<Vec<u8>>,
    /// Set when the transfer carries an observe notification, so a newer
    /// notification can abandon this one.
    notification: bool,
    random_access: bool,
    complete: bool,
    touched: Instant,
    observers: Vec<Arc<dyn MessageObserver>>,
}

impl Block2Status {
    /// Creates a tracker assembling a download, capped at `buffer_size`
    /// bytes. `response` must be the first block of the transfer.
    pub fn inbound(response: &Response, buffer_size: usize, now: Instant) -> Self {
        let mut template = response.clone();
        template.set_payload(SharedBody::empty());
        let szx = response.options().block2().map_or(6, |block| block.szx());
        Self {
            buffer: Vec::new(),
            source: None,
            template: Some(template),
            current_num: 0,
            szx,
            buffer_size,
            etag: response.options().etag().map(<[u8]>::to_vec),
            notification: response.is_notification(),
            random_access: false,
            complete: false,
            touched: now,
            observers: Vec::new(),
        }
    }

    /// Creates a tracker serving `response`'s body blockwise.
    pub fn outbound(response: &Response, szx: u8, now: Instant) -> Self {
        let source = response.payload().clone();
        let mut template = response.clone();
        template.set_payload(SharedBody::empty());
        template.options_mut().clear_block2();
        Self {
            buffer: Vec::new(),
            buffer_size: source.len(),
            source: Some(source),
            template: Some(template),
            current_num: 0,
            szx,
            etag: response.options().etag().map(<[u8]>::to_vec),
            notification: response.is_notification(),
            random_access: false,
            complete: false,
            touched: now,
            observers: response.observers().to_vec(),
        }
    }

    /// Creates a non-assembling tracker for an explicit block request.
    pub fn random_access(block: BlockOption, now: Instant) -> Self {
        Self {
            buffer: Vec::new(),
            source: None,
            template: None,
            current_num: block.num(),
            szx: block.szx(),
            buffer_size: 0,
            etag: None,
            notification: false,
            random_access: true,
            complete: false,
            touched: now,
            observers: Vec::new(),
        }
    }

    /// Next block index expected (inbound) or most recently served
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

    /// True once the transfer finished or was abandoned.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True for a non-assembling random-access tracker.
    pub fn is_random_access(&self) -> bool {
        self.random_access
    }

    /// True when the transfer carries an observe notification.
    pub fn is_notification(&self) -> bool {
        self.notification
    }

    /// True when `etag` matches the snapshot taken from the first block.
    pub fn matches_etag(&self, etag: Option<&[u8]>) -> bool {
        self.etag.as_deref() == etag
    }

    /// Appends one block payload to the assembly buffer. Returns false when
    /// the body would exceed the buffer cap.
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

    /// Builds the fully assembled response. Options come from the first
    /// block; MID and token come from `last`.
    pub fn assemble(&mut self, last: &Response) -> Response {
        let mut assembled =
            self.template.take().unwrap_or_else(|| Response::new(last.code()));
        assembled.options_mut().clear_block2();
        assembled.set_payload(SharedBody::from_vec(mem::take(&mut self.buffer)));
        assembled.set_mid(last.mid());
        assembled.set_token(last.token().clone());
        if let Some(source) = last.source() {
            assembled.set_source(source);
        }
        self.complete = true;
        assembled
    }

    /// Serves the block response `requested` asks for. For BERT the
    /// position counts 1024-byte sub-blocks. The first block carries a
    /// Size2 hint with the full body length. The tracker completes when the
    /// final block is served.
    pub fn next_response_block(&mut self, requested: BlockOption) -> Result<Response> {
        let source =
            self.source.as_ref().ok_or(TransferErrorKind::WrongOrientation)?;
        let template =
            self.template.as_ref().ok_or(TransferErrorKind::WrongOrientation)?;

        let stride = requested.stride();
        let payload = source
            .block(requested.num(), stride)
            .ok_or(TransferErrorKind::UnknownBlock)?;
        let more = source.more_after(requested.num(), stride);

        let mut block = template.clone();
        if requested.num() == 0 {
            block.options_mut().set_size2(source.len() as u32);
        }
        block.options_mut().set_block2(BlockOption::new(requested.szx(), more, requested.num()));
        block.set_payload(payload);

        self.current_num = requested.num();
        if !more {
            self.complete = true;
        }
        Ok(block)
    }

    /// Crops a full-body response in place down to the block `requested`
    /// asks for. Fails when the block starts beyond the body.
    pub fn crop(response: &mut Response, requested: BlockOption) -> Result<()> {
        let stride = requested.stride();
        let payload = response
            .payload()
            .block(requested.num(), stride)
            .ok_or(TransferErrorKind::UnknownBlock)?;
        let more = response.payload().more_after(requested.num(), stride);
        response.set_payload(payload);
        response
            .options_mut()
            .set_block2(BlockOption::new(requested.szx(), more, requested.num()));
        Ok(())
    }

    /// Abandons the transfer, telling every observer it completed without a
    /// result.
    pub fn cancel(&mut self) {
        for observer in &self.observers {
            observer.on_cancel();
        }
        self.complete = true;
        self.buffer.clear();
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
