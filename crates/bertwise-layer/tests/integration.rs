//! Integration tests for the bertwise-layer crate.
//!
//! These tests drive the blockwise state machine end to end with mock
//! upper and lower layers that capture forwarded messages through
//! channels, playing both the client and the server side of a transfer.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};

use bertwise_core::{body::SharedBody, config::Config};
use bertwise_layer::{BlockwiseLayer, Exchange, LowerLayer, UpperLayer};
use bertwise_protocol::{BlockOption, Code, Request, Response, Token};

struct ChannelUpper {
    requests: Sender<Request>,
    responses: Sender<Response>,
}

impl UpperLayer for ChannelUpper {
    fn receive_request(&self, _exchange: &mut Exchange, request: Request) {
        self.requests.send(request).expect("receiver lives for the test");
    }

    fn receive_response(&self, _exchange: &mut Exchange, response: Response) {
        self.responses.send(response).expect("receiver lives for the test");
    }
}

struct ChannelLower {
    requests: Sender<Request>,
    responses: Sender<Response>,
}

impl LowerLayer for ChannelLower {
    fn send_request(&self, _exchange: &mut Exchange, request: Request) {
        self.requests.send(request).expect("receiver lives for the test");
    }

    fn send_response(&self, _exchange: &mut Exchange, response: Response) {
        self.responses.send(response).expect("receiver lives for the test");
    }
}

struct Harness {
    layer: BlockwiseLayer,
    delivered_requests: Receiver<Request>,
    delivered_responses: Receiver<Response>,
    wire_requests: Receiver<Request>,
    wire_responses: Receiver<Response>,
}

fn harness(config: &Config) -> Harness {
    let (request_tx, delivered_requests) = unbounded();
    let (response_tx, delivered_responses) = unbounded();
    let (wire_request_tx, wire_requests) = unbounded();
    let (wire_response_tx, wire_responses) = unbounded();

    let layer = BlockwiseLayer::new(
        config,
        Arc::new(ChannelUpper { requests: request_tx, responses: response_tx }),
        Arc::new(ChannelLower { requests: wire_request_tx, responses: wire_response_tx }),
    );

    Harness { layer, delivered_requests, delivered_responses, wire_requests, wire_responses }
}

fn client_addr() -> SocketAddr {
    "10.0.0.1:45000".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "10.0.0.2:5683".parse().unwrap()
}

fn upload_request(body: Vec<u8>) -> Request {
    let mut request = Request::new(Code::Put);
    request.set_token(Token::new(vec![0xaa]));
    request.options_mut().set_uri_path("/store");
    request.set_payload(SharedBody::from_vec(body));
    request
}

/// Runs a full blockwise upload from `client` to `server`, returning the
/// request the server's application layer received.
fn run_upload(client: &Harness, server: &Harness, body: Vec<u8>) -> Request {
    let now = Instant::now();
    let request = upload_request(body);
    let mut client_exchange = Exchange::new(server_addr(), request.clone());
    client.layer.send_request(&mut client_exchange, request, now);

    loop {
        let mut on_wire =
            client.wire_requests.try_recv().expect("client should have sent a block");
        on_wire.set_source(client_addr());
        let mut server_exchange = Exchange::new(client_addr(), on_wire.clone());
        server.layer.receive_request(&mut server_exchange, on_wire, now);

        if let Ok(assembled) = server.delivered_requests.try_recv() {
            return assembled;
        }

        let mut ack =
            server.wire_responses.try_recv().expect("server should have acknowledged");
        ack.set_source(server_addr());
        client.layer.receive_response(&mut client_exchange, ack, now);
    }
}

// ===== Scenario: plain Block1 upload at SZX 6 =====

#[test]
fn test_plain_block1_upload() {
    let server = harness(&Config::default());
    let now = Instant::now();

    let body: Vec<u8> = (0..3572u32).map(|i| (i % 251) as u8).collect();
    let mut last_exchange = None;

    for num in 0..=3u32 {
        let start = num as usize * 1024;
        let end = (start + 1024).min(body.len());
        let more = end < body.len();

        let mut block = Request::new(Code::Put);
        block.set_token(Token::new(vec![0xaa]));
        block.set_mid(Some(100 + num as u16));
        block.options_mut().set_uri_path("/store");
        block.options_mut().set_block1(BlockOption::new(6, more, num));
        block.set_payload(SharedBody::from_vec(body[start..end].to_vec()));
        block.set_source(client_addr());

        let mut exchange = Exchange::new(client_addr(), block.clone());
        server.layer.receive_request(&mut exchange, block, now);

        if more {
            let ack = server.wire_responses.try_recv().expect("2.31 expected");
            assert_eq!(ack.code(), Code::Continue);
            let block1 = ack.options().block1().unwrap();
            assert_eq!((block1.szx(), block1.m(), block1.num()), (6, true, num));
        } else {
            last_exchange = Some(exchange);
        }
    }

    // The server application sees the fully assembled body once.
    let assembled = server.delivered_requests.try_recv().unwrap();
    assert_eq!(assembled.payload().len(), 3572);
    assert_eq!(assembled.payload().as_slice(), &body[..]);
    assert!(server.delivered_requests.try_recv().is_err());

    // The application's response acknowledges the final block.
    let mut exchange = last_exchange.unwrap();
    let response = Response::create_for(exchange.request(), Code::Content);
    server.layer.send_response(&mut exchange, response, now);

    let on_wire = server.wire_responses.try_recv().unwrap();
    let block1 = on_wire.options().block1().unwrap();
    assert_eq!((block1.szx(), block1.m(), block1.num()), (6, false, 3));
    assert_eq!(server.layer.registry().block1_count(), 0);
}

// ===== Scenario: BERT upload with step size 4 =====

#[test]
fn test_bert_upload_step_four() {
    let client_config = Config { number_of_bulk_blocks: 4, ..Config::default() };
    let server_config = Config { max_resource_body_size: 16384, ..Config::default() };
    let client = harness(&client_config);
    let server = harness(&server_config);
    let now = Instant::now();

    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let request = upload_request(body.clone());
    let mut client_exchange = Exchange::new(server_addr(), request.clone());
    client.layer.send_request(&mut client_exchange, request, now);

    let expected = [(4096, true, 0u32), (4096, true, 4), (1808, false, 8)];
    for (len, more, num) in expected {
        let mut on_wire = client.wire_requests.try_recv().expect("block expected");
        assert_eq!(on_wire.payload().len(), len);
        let block1 = on_wire.options().block1().unwrap();
        assert_eq!((block1.szx(), block1.m(), block1.num()), (7, more, num));

        on_wire.set_source(client_addr());
        let mut server_exchange = Exchange::new(client_addr(), on_wire.clone());
        server.layer.receive_request(&mut server_exchange, on_wire, now);

        if more {
            let mut ack = server.wire_responses.try_recv().expect("2.31 expected");
            assert_eq!(ack.code(), Code::Continue);
            let acked = ack.options().block1().unwrap();
            assert_eq!((acked.szx(), acked.m(), acked.num()), (7, true, num));
            ack.set_source(server_addr());
            client.layer.receive_response(&mut client_exchange, ack, now);
        }
    }

    let assembled = server.delivered_requests.try_recv().unwrap();
    assert_eq!(assembled.payload().len(), 10_000);
    assert_eq!(assembled.payload().as_slice(), &body[..]);
}

// ===== Scenario: wrong block number is rejected with 4.08 =====

#[test]
fn test_wrong_block_number_rejection() {
    let server = harness(&Config::default());
    let now = Instant::now();

    let mut first = upload_request(vec![1u8; 1024]);
    first.options_mut().set_block1(BlockOption::new(6, true, 0));
    first.set_source(client_addr());
    let mut exchange = Exchange::new(client_addr(), first.clone());
    server.layer.receive_request(&mut exchange, first, now);
    assert_eq!(server.wire_responses.try_recv().unwrap().code(), Code::Continue);

    // Block 2 arrives while block 1 was expected.
    let mut skipped = upload_request(vec![2u8; 1024]);
    skipped.options_mut().set_block1(BlockOption::new(6, true, 2));
    skipped.set_source(client_addr());
    let mut exchange = Exchange::new(client_addr(), skipped.clone());
    server.layer.receive_request(&mut exchange, skipped, now);

    let error = server.wire_responses.try_recv().unwrap();
    assert_eq!(error.code(), Code::RequestEntityIncomplete);
    assert_eq!(error.payload().as_slice(), b"wrong block number");

    // No state survives the rejection.
    assert_eq!(server.layer.registry().block1_count(), 0);
    assert!(server.delivered_requests.try_recv().is_err());
}

// ===== Scenario: random access into a server-side representation =====

#[test]
fn test_random_access_block_retrieval() {
    let server = harness(&Config::default());
    let now = Instant::now();

    let mut request = Request::new(Code::Get);
    request.set_token(Token::new(vec![0xbb]));
    request.options_mut().set_uri_path("/repr");
    request.options_mut().set_block2(BlockOption::new(6, false, 3));
    request.set_source(client_addr());

    let mut exchange = Exchange::new(client_addr(), request.clone());
    server.layer.receive_request(&mut exchange, request, now);

    // No transfer is in progress, so the resource produces the body.
    let delivered = server.delivered_requests.try_recv().unwrap();
    assert_eq!(delivered.options().block2().unwrap().num(), 3);

    let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let mut response = Response::create_for(exchange.request(), Code::Content);
    response.set_payload(SharedBody::from_vec(body.clone()));
    server.layer.send_response(&mut exchange, response, now);

    let on_wire = server.wire_responses.try_recv().unwrap();
    assert_eq!(on_wire.payload().as_slice(), &body[3072..4096]);
    let block2 = on_wire.options().block2().unwrap();
    assert_eq!((block2.szx(), block2.m(), block2.num()), (6, true, 3));
}

// ===== Scenario: a newer notification preempts the ongoing transfer =====

#[test]
fn test_observe_preemption() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CancelCounter(AtomicUsize);
    impl bertwise_protocol::MessageObserver for CancelCounter {
        fn on_cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let server = harness(&Config::default());
    let now = Instant::now();
    let counter = Arc::new(CancelCounter(AtomicUsize::new(0)));

    let mut request = Request::new(Code::Get);
    request.set_token(Token::new(vec![0xcc]));
    request.options_mut().set_uri_path("/obs");
    request.options_mut().set_observe(0);
    request.set_source(client_addr());

    // First notification starts a blockwise transfer.
    let mut first_exchange = Exchange::new(client_addr(), request.clone());
    let mut notification = Response::create_for(&request, Code::Content);
    notification.options_mut().set_observe(1);
    notification.set_payload(SharedBody::from_vec(vec![1u8; 5000]));
    notification.add_observer(counter.clone());
    server.layer.send_response(&mut first_exchange, notification, now);

    let first_block = server.wire_responses.try_recv().unwrap();
    assert!(first_block.options().block2().unwrap().m());
    assert_eq!(server.layer.registry().block2_count(), 1);
    assert_eq!(counter.0.load(Ordering::SeqCst), 0);

    // A newer notification for the same resource abandons the old
    // transfer; its observers hear about the cancellation.
    let mut second_exchange = Exchange::new(client_addr(), request.clone());
    let mut newer = Response::create_for(&request, Code::Content);
    newer.options_mut().set_observe(2);
    newer.set_payload(SharedBody::from_vec(vec![2u8; 5000]));
    server.layer.send_response(&mut second_exchange, newer, now);

    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(server.layer.registry().block2_count(), 1);
    let restarted = server.wire_responses.try_recv().unwrap();
    assert_eq!(restarted.options().block2().unwrap().num(), 0);
    assert_eq!(restarted.payload().as_slice(), &vec![2u8; 1024][..]);
}

// ===== Scenario: resource implementation returns the wrong block =====

#[test]
fn test_resource_implementation_mismatch() {
    let server = harness(&Config::default());
    let now = Instant::now();

    let mut request = Request::new(Code::Get);
    request.set_token(Token::new(vec![0xdd]));
    request.options_mut().set_uri_path("/buggy");
    request.options_mut().set_block2(BlockOption::new(6, false, 3));
    request.set_source(client_addr());

    let mut exchange = Exchange::new(client_addr(), request.clone());
    server.layer.receive_request(&mut exchange, request, now);
    server.delivered_requests.try_recv().unwrap();

    struct Nop;
    impl bertwise_protocol::MessageObserver for Nop {}

    let mut response = Response::create_for(exchange.request(), Code::Content);
    response.set_mid(Some(777));
    response.options_mut().set_block2(BlockOption::new(6, false, 5));
    response.set_payload(SharedBody::from_vec(vec![1u8; 1024]));
    response.add_observer(Arc::new(Nop));
    server.layer.send_response(&mut exchange, response, now);

    let on_wire = server.wire_responses.try_recv().unwrap();
    assert_eq!(on_wire.code(), Code::InternalServerError);
    // The original MID and message observers survive the substitution.
    assert_eq!(on_wire.mid(), Some(777));
    assert_eq!(on_wire.observers().len(), 1);
}

// ===== Property: fragment, transmit, reassemble is the identity =====

#[test]
fn test_upload_roundtrip_identity() {
    for bulk in [2usize, 4] {
        for len in [1025usize, 2048, 4097, 10_000] {
            let client_config =
                Config { number_of_bulk_blocks: bulk, ..Config::default() };
            let server_config =
                Config { max_resource_body_size: 16384, ..Config::default() };
            let client = harness(&client_config);
            let server = harness(&server_config);

            let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let assembled = run_upload(&client, &server, body.clone());

            assert_eq!(
                assembled.payload().as_slice(),
                &body[..],
                "round trip for len={} bulk={}",
                len,
                bulk
            );
            assert_eq!(server.layer.registry().block1_count(), 0);
        }
    }
}

// ===== Transparent download, plain and BERT =====

#[test]
fn test_transparent_download_roundtrip() {
    let client = harness(&Config::default());
    let server = harness(&Config::default());
    let now = Instant::now();

    let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    let mut get = Request::new(Code::Get);
    get.set_token(Token::new(vec![0xee]));
    get.options_mut().set_uri_path("/repr");

    let mut client_exchange = Exchange::new(server_addr(), get.clone());
    client.layer.send_request(&mut client_exchange, get, now);

    let mut server_exchange = None;
    loop {
        let mut on_wire = client.wire_requests.try_recv().expect("request expected");
        on_wire.set_source(client_addr());
        let mut exchange = Exchange::new(client_addr(), on_wire.clone());
        server.layer.receive_request(&mut exchange, on_wire, now);

        if server.delivered_requests.try_recv().is_ok() {
            // The resource responds with the full body once.
            let mut response = Response::create_for(exchange.request(), Code::Content);
            response.set_payload(SharedBody::from_vec(body.clone()));
            server.layer.send_response(&mut exchange, response, now);
            server_exchange = Some(exchange);
        }

        let mut block = server.wire_responses.try_recv().expect("block expected");
        block.set_source(server_addr());
        client.layer.receive_response(&mut client_exchange, block, now);

        if let Ok(assembled) = client.delivered_responses.try_recv() {
            assert_eq!(assembled.payload().as_slice(), &body[..]);
            assert!(server_exchange.is_some());
            assert_eq!(client.layer.registry().block2_count(), 0);
            assert_eq!(server.layer.registry().block2_count(), 0);
            return;
        }
    }
}

#[test]
fn test_bert_download_roundtrip() {
    let client = harness(&Config { max_resource_body_size: 16384, ..Config::default() });
    let server = harness(&Config {
        number_of_bulk_blocks: 4,
        max_resource_body_size: 16384,
        ..Config::default()
    });
    let now = Instant::now();

    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let mut get = Request::new(Code::Get);
    get.set_token(Token::new(vec![0xef]));
    get.options_mut().set_uri_path("/big");

    let mut client_exchange = Exchange::new(server_addr(), get.clone());
    client.layer.send_request(&mut client_exchange, get, now);

    let mut served_sizes = Vec::new();
    loop {
        let mut on_wire = client.wire_requests.try_recv().expect("request expected");
        on_wire.set_source(client_addr());
        let mut exchange = Exchange::new(client_addr(), on_wire.clone());
        server.layer.receive_request(&mut exchange, on_wire, now);

        if server.delivered_requests.try_recv().is_ok() {
            let mut response = Response::create_for(exchange.request(), Code::Content);
            response.set_payload(SharedBody::from_vec(body.clone()));
            server.layer.send_response(&mut exchange, response, now);
        }

        let mut block = server.wire_responses.try_recv().expect("block expected");
        block.set_source(server_addr());
        assert_eq!(block.options().block2().unwrap().szx(), 7);
        served_sizes.push(block.payload().len());
        client.layer.receive_response(&mut client_exchange, block, now);

        if let Ok(assembled) = client.delivered_responses.try_recv() {
            assert_eq!(assembled.payload().as_slice(), &body[..]);
            // Three bulked blocks carried the body.
            assert_eq!(served_sizes, vec![4096, 4096, 1808]);
            return;
        }
    }
}

// ===== Oversized declarations and garbage collection =====

#[test]
fn test_declared_body_too_large() {
    let server = harness(&Config::default());
    let now = Instant::now();

    let mut request = upload_request(vec![0u8; 1024]);
    request.options_mut().set_block1(BlockOption::new(6, true, 0));
    request.options_mut().set_size1(100_000);
    request.set_source(client_addr());

    let mut exchange = Exchange::new(client_addr(), request.clone());
    server.layer.receive_request(&mut exchange, request, now);

    let response = server.wire_responses.try_recv().unwrap();
    assert_eq!(response.code(), Code::RequestEntityTooLarge);
    assert_eq!(response.options().size1(), Some(8192));
    assert_eq!(server.layer.registry().block1_count(), 0);
}

#[test]
fn test_abandoned_transfer_is_collected() {
    let server = harness(&Config::default());
    let start = Instant::now();

    let mut request = upload_request(vec![0u8; 1024]);
    request.options_mut().set_block1(BlockOption::new(6, true, 0));
    request.set_source(client_addr());

    let mut exchange = Exchange::new(client_addr(), request.clone());
    server.layer.receive_request(&mut exchange, request, start);
    server.wire_responses.try_recv().unwrap();
    assert_eq!(server.layer.registry().block1_count(), 1);

    // Nothing else arrives; the sweep reclaims the tracker.
    assert_eq!(server.layer.cleanup_expired(start + Duration::from_secs(10)), 0);
    assert_eq!(server.layer.cleanup_expired(start + Duration::from_secs(31)), 1);
    assert_eq!(server.layer.registry().block1_count(), 0);
}
