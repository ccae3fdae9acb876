use bytes::Bytes;
use pergola::{
    CallContext, Error, GrpcTransport, Options, Request, StreamRequest, TransportError,
    ValidationError, DEFAULT_TIMEOUT,
};
use std::time::Duration;
use tests::fake_engine::{Behaviour, FakeEngine, FakeHandle};
use tokio::time::Instant;
use tracing::Dispatch;

async fn transport(
    addresses: &[&str],
    behaviour: Behaviour,
) -> (GrpcTransport<FakeEngine>, FakeHandle) {
    let fake = FakeHandle::new(behaviour);
    let transport = GrpcTransport::with_engine(
        Options::new(addresses.iter().copied())
            .tracer(Dispatch::none())
            .caller("caller")
            .encoding("json")
            .routing_key("rk")
            .routing_delegate("rd"),
        fake.engine(),
    )
    .await
    .expect("failed to construct transport");
    (transport, fake)
}

#[tokio::test]
async fn call_translates_the_request_and_materializes_the_response() {
    let body = Bytes::from(vec![7u8; 500]);
    let (transport, fake) = transport(
        &["a:1"],
        Behaviour {
            response_headers: vec![
                ("x-one".to_string(), "1".to_string()),
                ("x-two".to_string(), "2".to_string()),
            ],
            response_body: Some(body.clone()),
            ..Behaviour::default()
        },
    )
    .await;

    let request = Request::new("users", "pkg.Users::Get")
        .header("X-Trace", "abc")
        .shard_key("shard-9")
        .body("payload");
    let response = transport
        .call(&CallContext::background(), &request)
        .await
        .unwrap();

    assert_eq!(response.body, body);
    assert_eq!(response.headers.len(), 2);
    assert!(response
        .headers
        .contains(&("x-two".to_string(), "2".to_string())));

    let recording = fake.recording();
    let call = &recording.calls[0];
    let meta = &call.request.meta;
    assert_eq!(meta.caller, "caller");
    assert_eq!(meta.service, "users");
    assert_eq!(meta.encoding, "json");
    assert_eq!(meta.procedure, "pkg.Users::Get");
    assert_eq!(meta.shard_key, "shard-9");
    assert_eq!(meta.routing_key, "rk");
    assert_eq!(meta.routing_delegate, "rd");
    assert_eq!(meta.headers.get("x-trace"), Some("abc"));
    assert_eq!(call.request.body, Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn missing_body_yields_an_empty_response_body() {
    let (transport, _fake) = transport(&["a:1"], Behaviour::default()).await;

    let response = transport
        .call(&CallContext::background(), &Request::new("users", "Get"))
        .await
        .unwrap();

    assert!(response.body.is_empty());
    assert!(response.headers.is_empty());
}

#[tokio::test]
async fn missing_service_or_method_is_rejected_before_dispatch() {
    let (transport, fake) = transport(&["a:1"], Behaviour::default()).await;
    let ctx = CallContext::background();

    let err = transport
        .call(&ctx, &Request::new("", "Get"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::NoService)));

    let err = transport
        .call(&ctx, &Request::new("users", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::NoProcedure)));

    // Service is checked first.
    let err = transport.call(&ctx, &Request::new("", "")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::NoService)));

    assert!(fake.recording().calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_comes_from_context_then_request_then_default() {
    let (transport, fake) = transport(&["a:1"], Behaviour::default()).await;

    let deadline = Instant::now() + Duration::from_millis(300);
    transport
        .call(
            &CallContext::with_deadline(deadline),
            &Request::new("s", "m").timeout(Duration::from_secs(20)),
        )
        .await
        .unwrap();

    let now = Instant::now();
    transport
        .call(
            &CallContext::background(),
            &Request::new("s", "m").timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    transport
        .call(&CallContext::background(), &Request::new("s", "m"))
        .await
        .unwrap();
    transport
        .call(
            &CallContext::background(),
            &Request::new("s", "m").timeout(Duration::ZERO),
        )
        .await
        .unwrap();

    let deadlines: Vec<_> = fake
        .recording()
        .calls
        .iter()
        .map(|call| call.deadline.expect("every call carries a deadline"))
        .collect();
    assert_eq!(
        deadlines,
        vec![
            deadline,
            now + Duration::from_secs(5),
            now + DEFAULT_TIMEOUT,
            now + DEFAULT_TIMEOUT,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_peer_exceeds_the_deadline() {
    let (transport, fake) = transport(
        &["a:1"],
        Behaviour {
            call_delay: Some(Duration::from_secs(3)),
            ..Behaviour::default()
        },
    )
    .await;

    let err = transport
        .call(&CallContext::background(), &Request::new("s", "m"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transport(TransportError::DeadlineExceeded)
    ));
    assert_eq!(fake.recording().calls.len(), 1);
}

#[tokio::test]
async fn engine_errors_are_returned_unchanged() {
    let (transport, _fake) = transport(
        &["a:1"],
        Behaviour {
            fail_call: true,
            ..Behaviour::default()
        },
    )
    .await;

    let err = transport
        .call(&CallContext::background(), &Request::new("s", "m"))
        .await
        .unwrap_err();

    match err {
        Error::Transport(TransportError::Status(status)) => {
            assert_eq!(status.code(), tonic::Code::Unavailable);
            assert_eq!(status.message(), "peer unavailable");
        }
        other => panic!("expected a status error, got {other:?}"),
    }
}

#[tokio::test]
async fn calls_rotate_evenly_across_peers() {
    let (transport, fake) = transport(&["a:1", "b:2", "c:3"], Behaviour::default()).await;

    for _ in 0..9 {
        transport
            .call(&CallContext::background(), &Request::new("s", "m"))
            .await
            .unwrap();
    }

    assert_eq!(
        fake.recording().calls_per_peer(),
        vec![
            ("a:1".to_string(), 3),
            ("b:2".to_string(), 3),
            ("c:3".to_string(), 3),
        ]
    );
}

#[tokio::test]
async fn stream_requests_carry_translated_metadata() {
    let (transport, fake) = transport(&["a:1"], Behaviour::default()).await;

    let request = StreamRequest::from(Request::new("users", "Watch").shard_key("s1"));
    let mut stream = transport
        .call_stream(&CallContext::background(), &request)
        .await
        .unwrap();

    stream.send("ping").await.unwrap();
    let echoed = stream.receive().await.unwrap().unwrap();
    assert_eq!(echoed, Bytes::from_static(b"ping"));

    let recording = fake.recording();
    let meta = recording.streams[0]
        .request
        .meta
        .as_ref()
        .expect("stream meta");
    assert_eq!(meta.caller, "caller");
    assert_eq!(meta.service, "users");
    assert_eq!(meta.procedure, "Watch");
    assert_eq!(meta.shard_key, "s1");
    assert_eq!(meta.encoding, "json");
}

#[tokio::test]
async fn stream_without_inner_request_is_forwarded_without_metadata() {
    let (transport, fake) = transport(&["a:1"], Behaviour::default()).await;

    transport
        .call_stream(&CallContext::background(), &StreamRequest::default())
        .await
        .expect("the outbound decides what to do with a bare stream request");

    assert!(fake.recording().streams[0].request.meta.is_none());
}
