use pergola::{ConfigError, Error, GrpcTransport, Options, TransportError};
use std::io::Write;
use tests::fake_engine::{Behaviour, FakeHandle};
use tests::tls::TestTlsFixture;
use tracing::Dispatch;

fn options() -> Options {
    Options::new(["a:1", "b:2"])
        .tracer(Dispatch::none())
        .caller("svc")
}

#[tokio::test]
async fn missing_required_options_start_nothing() {
    let cases = [
        (
            Options::new(Vec::<String>::new())
                .tracer(Dispatch::none())
                .caller("svc"),
            "no addresses",
        ),
        (Options::new(["a:1"]).caller("svc"), "no tracer"),
        (Options::new(["a:1"]).tracer(Dispatch::none()), "no caller"),
    ];

    for (options, case) in cases {
        let fake = FakeHandle::default();
        let err = GrpcTransport::with_engine(options, fake.engine())
            .await
            .expect_err(case);

        let expected = match case {
            "no addresses" => matches!(err, Error::Config(ConfigError::NoAddresses)),
            "no tracer" => matches!(err, Error::Config(ConfigError::NoTracer)),
            _ => matches!(err, Error::Config(ConfigError::NoCaller)),
        };
        assert!(expected, "{case}: unexpected error {err:?}");

        let recording = fake.recording();
        assert!(recording.config.is_none(), "{case}: engine was constructed");
        assert_eq!(recording.engine_starts, 0);
        assert_eq!(recording.outbound_starts, 0);
    }
}

#[tokio::test]
async fn plaintext_transport_starts_in_order_and_closes_cleanly() {
    let fake = FakeHandle::default();

    let transport = GrpcTransport::with_engine(options(), fake.engine())
        .await
        .expect("failed to construct transport");
    {
        let recording = fake.recording();
        assert!(!recording.secure);
        assert_eq!(recording.engine_starts, 1);
        assert_eq!(recording.outbound_starts, 1);
        assert_eq!(
            recording
                .bound_peers
                .iter()
                .map(|peer| peer.address())
                .collect::<Vec<_>>(),
            vec!["a:1", "b:2"]
        );
    }

    transport.close().await.expect("close should succeed");

    let recording = fake.recording();
    assert_eq!(recording.engine_stops, 1);
    assert_eq!(recording.outbound_stops, 1);
}

#[tokio::test]
async fn engine_config_carries_the_response_bound() {
    let fake = FakeHandle::default();
    let _transport =
        GrpcTransport::with_engine(options().max_response_size(1024), fake.engine())
            .await
            .unwrap();
    assert_eq!(
        fake.recording().config.as_ref().unwrap().max_recv_msg_size,
        Some(1024)
    );

    let fake = FakeHandle::default();
    let _transport = GrpcTransport::with_engine(options(), fake.engine())
        .await
        .unwrap();
    assert_eq!(
        fake.recording().config.as_ref().unwrap().max_recv_msg_size,
        None
    );
}

#[tokio::test]
async fn engine_start_failure_never_starts_the_outbound() {
    let fake = FakeHandle::new(Behaviour {
        fail_engine_start: true,
        ..Behaviour::default()
    });

    let err = GrpcTransport::with_engine(options(), fake.engine())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(TransportError::Other(_))));
    let recording = fake.recording();
    assert_eq!(recording.outbound_starts, 0);
    assert_eq!(recording.engine_stops, 0);
}

#[tokio::test]
async fn outbound_start_failure_stops_the_engine() {
    let fake = FakeHandle::new(Behaviour {
        fail_outbound_start: true,
        ..Behaviour::default()
    });

    let err = GrpcTransport::with_engine(options(), fake.engine())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("outbound start"));
    let recording = fake.recording();
    assert_eq!(recording.engine_starts, 1);
    assert_eq!(recording.engine_stops, 1);
    assert_eq!(recording.outbound_stops, 0);
}

#[tokio::test]
async fn close_attempts_both_stops_and_combines_failures() {
    let fake = FakeHandle::new(Behaviour {
        fail_engine_stop: true,
        fail_outbound_stop: true,
        ..Behaviour::default()
    });
    let transport = GrpcTransport::with_engine(options(), fake.engine())
        .await
        .unwrap();

    let err = transport.close().await.unwrap_err();

    match err {
        Error::Shutdown(shutdown) => {
            assert_eq!(shutdown.errors().len(), 2);
            let message = shutdown.to_string();
            assert!(message.contains("engine stop"));
            assert!(message.contains("outbound stop"));
        }
        other => panic!("expected a shutdown error, got {other:?}"),
    }
    let recording = fake.recording();
    assert_eq!(recording.engine_stops, 1);
    assert_eq!(recording.outbound_stops, 1);
}

#[tokio::test]
async fn close_still_stops_the_outbound_when_the_engine_fails_to_stop() {
    let fake = FakeHandle::new(Behaviour {
        fail_engine_stop: true,
        ..Behaviour::default()
    });
    let transport = GrpcTransport::with_engine(options(), fake.engine())
        .await
        .unwrap();

    match transport.close().await {
        Err(Error::Shutdown(shutdown)) => assert_eq!(shutdown.errors().len(), 1),
        other => panic!("expected a shutdown error, got {other:?}"),
    }
    assert_eq!(fake.recording().outbound_stops, 1);
}

#[tokio::test]
async fn ca_without_pem_block_fails_before_anything_starts() {
    let mut ca = tempfile::NamedTempFile::new().unwrap();
    ca.write_all(b"not a pem file").unwrap();
    let fake = FakeHandle::default();

    let err = GrpcTransport::with_engine(options().with_tls(ca.path(), "c", "k"), fake.engine())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(ConfigError::AppendCa)));
    assert!(err.to_string().contains("certificate pool"));
    let recording = fake.recording();
    assert_eq!(recording.engine_starts, 0);
    assert_eq!(recording.outbound_starts, 0);
}

#[tokio::test]
async fn unreadable_client_key_is_a_config_error() {
    let fixture = TestTlsFixture::generate();
    let files = fixture.client_files();
    let fake = FakeHandle::default();

    let err = GrpcTransport::with_engine(
        options().with_tls(&files.ca, &files.cert, files.cert.with_extension("missing")),
        fake.engine(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::Config(ConfigError::LoadKeyPair { .. })
    ));
    assert_eq!(fake.recording().engine_starts, 0);
}

#[tokio::test]
async fn complete_tls_triple_binds_peers_through_the_dialer() {
    let fixture = TestTlsFixture::generate();
    let files = fixture.client_files();
    let fake = FakeHandle::default();

    let transport = GrpcTransport::with_engine(
        options().with_tls(&files.ca, &files.cert, &files.key),
        fake.engine(),
    )
    .await
    .expect("valid tls material should be accepted");

    assert!(fake.recording().secure);
    assert_eq!(fake.recording().bound_peers.len(), 2);
    transport.close().await.unwrap();
}

#[tokio::test]
async fn partial_tls_triple_falls_back_to_plaintext() {
    let fake = FakeHandle::default();
    let options = Options {
        ca_path: Some("ca.pem".into()),
        ..options()
    };

    let _transport = GrpcTransport::with_engine(options, fake.engine())
        .await
        .expect("partial tls configuration is ignored");

    assert!(!fake.recording().secure);
}
