use std::{fmt, net::SocketAddr, sync::Arc};

use bertwise_core::{body::SharedBody, error::ErrorKind};

use crate::{code::Code, option::OptionSet};

/// CoAP message token, correlating responses with requests.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    /// Creates a token from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Creates the empty token.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Raw token bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// True for the zero-length token.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl From<&[u8]> for Token {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Observer notified about the fate of a message or of the blockwise
/// transfer tracking it.
pub trait MessageObserver: Send + Sync {
    /// The lower layer failed to send the message.
    fn on_send_error(&self, _error: &ErrorKind) {}
    /// The transfer tracking the message was replaced or completed without
    /// a result.
    fn on_cancel(&self) {}
    /// The transfer tracking the message idled past its cleanup deadline.
    fn on_timeout(&self) {}
}

/// An outbound or inbound CoAP request as seen by the blockwise layer.
#[derive(Clone)]
pub struct Request {
    code: Code,
    mid: Option<u16>,
    token: Token,
    options: OptionSet,
    payload: SharedBody,
    source: Option<SocketAddr>,
    destination: Option<SocketAddr>,
    scheme: String,
    observers: Vec<Arc<dyn MessageObserver>>,
    send_error: Option<ErrorKind>,
}

impl Request {
    /// Creates a request with the given method code and no payload.
    pub fn new(code: Code) -> Self {
        Self {
            code,
            mid: None,
            token: Token::empty(),
            options: OptionSet::new(),
            payload: SharedBody::empty(),
            source: None,
            destination: None,
            scheme: "coap+tcp".to_string(),
            observers: Vec::new(),
            send_error: None,
        }
    }

    /// The request method code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Message ID, if one was assigned.
    pub fn mid(&self) -> Option<u16> {
        self.mid
    }

    /// Assigns the message ID.
    pub fn set_mid(&mut self, mid: Option<u16>) {
        self.mid = mid;
    }

    /// The request token.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Assigns the token.
    pub fn set_token(&mut self, token: Token) {
        self.token = token;
    }

    /// Read access to the options.
    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    /// Write access to the options.
    pub fn options_mut(&mut self) -> &mut OptionSet {
        &mut self.options
    }

    /// The message payload.
    pub fn payload(&self) -> &SharedBody {
        &self.payload
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: SharedBody) {
        self.payload = payload;
    }

    /// Endpoint the request arrived from.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Records the source endpoint.
    pub fn set_source(&mut self, source: SocketAddr) {
        self.source = Some(source);
    }

    /// Endpoint the request is addressed to.
    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// Records the destination endpoint.
    pub fn set_destination(&mut self, destination: SocketAddr) {
        self.destination = Some(destination);
    }

    /// URI scheme the request was issued under.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Replaces the URI scheme.
    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = scheme.into();
    }

    /// Registers an observer.
    pub fn add_observer(&mut self, observer: Arc<dyn MessageObserver>) {
        self.observers.push(observer);
    }

    /// Registers every observer of another message, preserving order.
    pub fn add_observers(&mut self, observers: &[Arc<dyn MessageObserver>]) {
        self.observers.extend_from_slice(observers);
    }

    /// The registered observers.
    pub fn observers(&self) -> &[Arc<dyn MessageObserver>] {
        &self.observers
    }

    /// Marks the request as failed to send and notifies its observers.
    pub fn set_send_error(&mut self, error: ErrorKind) {
        for observer in &self.observers {
            observer.on_send_error(&error);
        }
        self.send_error = Some(error);
    }

    /// The recorded send failure, if any.
    pub fn send_error(&self) -> Option<ErrorKind> {
        self.send_error
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("code", &self.code)
            .field("mid", &self.mid)
            .field("token", &self.token)
            .field("options", &self.options)
            .field("payload_len", &self.payload.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// An outbound or inbound CoAP response as seen by the blockwise layer.
#[derive(Clone)]
pub struct Response {
    code: Code,
    mid: Option<u16>,
    token: Token,
    options: OptionSet,
    payload: SharedBody,
    source: Option<SocketAddr>,
    destination: Option<SocketAddr>,
    observers: Vec<Arc<dyn MessageObserver>>,
    send_error: Option<ErrorKind>,
}

impl Response {
    /// Creates a response with the given code and no payload.
    pub fn new(code: Code) -> Self {
        Self {
            code,
            mid: None,
            token: Token::empty(),
            options: OptionSet::new(),
            payload: SharedBody::empty(),
            source: None,
            destination: None,
            observers: Vec::new(),
            send_error: None,
        }
    }

    /// Creates a response answering `request`: same MID and token, with the
    /// request's source as destination.
    pub fn create_for(request: &Request, code: Code) -> Self {
        let mut response = Self::new(code);
        response.mid = request.mid();
        response.token = request.token().clone();
        response.destination = request.source();
        response
    }

    /// The response code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Message ID, if one was assigned.
    pub fn mid(&self) -> Option<u16> {
        self.mid
    }

    /// Assigns the message ID.
    pub fn set_mid(&mut self, mid: Option<u16>) {
        self.mid = mid;
    }

    /// The response token.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Assigns the token.
    pub fn set_token(&mut self, token: Token) {
        self.token = token;
    }

    /// Read access to the options.
    pub fn options(&self) -> &OptionSet {
        &self.options
    }

    /// Write access to the options.
    pub fn options_mut(&mut self) -> &mut OptionSet {
        &mut self.options
    }

    /// The message payload.
    pub fn payload(&self) -> &SharedBody {
        &self.payload
    }

    /// Replaces the payload.
    pub fn set_payload(&mut self, payload: SharedBody) {
        self.payload = payload;
    }

    /// Endpoint the response arrived from.
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Records the source endpoint.
    pub fn set_source(&mut self, source: SocketAddr) {
        self.source = Some(source);
    }

    /// Endpoint the response is addressed to.
    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// Records the destination endpoint.
    pub fn set_destination(&mut self, destination: SocketAddr) {
        self.destination = Some(destination);
    }

    /// True when the response is an observe notification.
    pub fn is_notification(&self) -> bool {
        self.options.observe().is_some()
    }

    /// Registers an observer.
    pub fn add_observer(&mut self, observer: Arc<dyn MessageObserver>) {
        self.observers.push(observer);
    }

    /// Registers every observer of another message, preserving order.
    pub fn add_observers(&mut self, observers: &[Arc<dyn MessageObserver>]) {
        self.observers.extend_from_slice(observers);
    }

    /// The registered observers.
    pub fn observers(&self) -> &[Arc<dyn MessageObserver>] {
        &self.observers
    }

    /// Marks the response as failed to send and notifies its observers.
    pub fn set_send_error(&mut self, error: ErrorKind) {
        for observer in &self.observers {
            observer.on_send_error(&error);
        }
        self.send_error = Some(error);
    }

    /// The recorded send failure, if any.
    pub fn send_error(&self) -> Option<ErrorKind> {
        self.send_error
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("code", &self.code)
            .field("mid", &self.mid)
            .field("token", &self.token)
            .field("options", &self.options)
            .field("payload_len", &self.payload.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bertwise_core::error::TransferErrorKind;

    use super::*;

    #[test]
    fn test_create_for_copies_mid_token_and_addressing() {
        let mut request = Request::new(Code::Put);
        request.set_mid(Some(1234));
        request.set_token(Token::new(vec![0xca, 0xfe]));
        request.set_source("10.0.0.9:5683".parse().unwrap());

        let response = Response::create_for(&request, Code::Continue);
        assert_eq!(response.code(), Code::Continue);
        assert_eq!(response.mid(), Some(1234));
        assert_eq!(response.token(), request.token());
        assert_eq!(response.destination(), request.source());
    }

    #[test]
    fn test_send_error_notifies_observers() {
        struct Counter(AtomicUsize);
        impl MessageObserver for Counter {
            fn on_send_error(&self, _error: &ErrorKind) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut request = Request::new(Code::Post);
        request.add_observer(counter.clone());
        request.set_send_error(TransferErrorKind::Preempted.into());

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(request.send_error().is_some());
    }

    #[test]
    fn test_notification_flag_follows_observe() {
        let mut response = Response::new(Code::Content);
        assert!(!response.is_notification());
        response.options_mut().set_observe(7);
        assert!(response.is_notification());
    }
}
