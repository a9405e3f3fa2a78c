//! Runtime lifecycle: restart, shutdown, and configuration lookup.

use bytes::Bytes;
use mongrel2_handler::{
    transport::memory::MemoryTransport, Handler, HandlerRuntime, HandlerSettings,
    Headers, RequestEnvelope, SettingsSource, StaticSettings,
};
use tokio::time::{timeout, Duration};

const APP_ID: &str = "54c6755b-9628-40a4-9a2d-cc82a816345e";
const SEND_SPEC: &str = "tcp://127.0.0.1:9996";
const RECV_SPEC: &str = "tcp://127.0.0.1:9997";

fn settings() -> HandlerSettings { HandlerSettings::new(APP_ID, SEND_SPEC, RECV_SPEC) }

fn get_frame(conn_id: u64) -> Bytes {
    let mut headers = Headers::new();
    headers.insert("METHOD", "GET");
    RequestEnvelope::new("abc", conn_id, "/", headers, "").encode()
}

struct Defaults;

impl Handler for Defaults {}

#[tokio::test]
async fn restart_swaps_to_fresh_sockets_and_abandons_queued_frames() {
    let transport = MemoryTransport::new();
    let mut published = transport
        .take_published(SEND_SPEC)
        .expect("reply stream has not been taken");
    let mut runtime = HandlerRuntime::connect(transport.clone(), &settings(), Defaults)
        .await
        .expect("memory endpoints always open");
    assert_eq!(transport.source_opens(RECV_SPEC), 1);

    // Queued before the restart: stays with the socket being abandoned.
    transport.push_request(RECV_SPEC, get_frame(1));
    runtime.restart().await.expect("memory endpoints reopen");
    assert_eq!(transport.source_opens(RECV_SPEC), 2);
    assert_eq!(runtime.connection().app_id(), APP_ID);
    assert!(!runtime.connection().is_closed());
    transport.push_request(RECV_SPEC, get_frame(2));

    let token = runtime.shutdown_token();
    let task = tokio::spawn(async move {
        runtime.run().await.expect("run loop exits cleanly");
    });

    let reply = timeout(Duration::from_secs(5), published.recv())
        .await
        .expect("a reply should arrive")
        .expect("the reply stream is open");
    assert!(
        reply.starts_with(b"abc 1:2, "),
        "only the post-restart frame is answered; got {:?}",
        String::from_utf8_lossy(&reply)
    );

    token.cancel();
    task.await.expect("run loop task joins");
    assert!(
        published.try_recv().is_err(),
        "the pre-restart frame must not have been answered"
    );
}

#[tokio::test]
async fn cancelling_the_token_stops_the_loop() {
    let transport = MemoryTransport::new();
    let mut runtime = HandlerRuntime::connect(transport.clone(), &settings(), Defaults)
        .await
        .expect("memory endpoints always open");
    let token = runtime.shutdown_token();

    let task = tokio::spawn(async move {
        runtime.run().await.expect("run loop exits cleanly");
        runtime
    });
    token.cancel();

    let runtime = timeout(Duration::from_secs(5), task)
        .await
        .expect("the loop observes cancellation")
        .expect("run loop task joins");
    assert!(runtime.connection().is_closed());
}

#[tokio::test]
async fn shutdown_closes_the_connection_before_the_loop_starts() {
    let transport = MemoryTransport::new();
    let mut runtime = HandlerRuntime::connect(transport.clone(), &settings(), Defaults)
        .await
        .expect("memory endpoints always open");
    runtime.shutdown();
    assert!(runtime.connection().is_closed());

    // A closed connection means run() has nothing to do.
    timeout(Duration::from_secs(5), runtime.run())
        .await
        .expect("the loop exits immediately")
        .expect("run loop exits cleanly");
}

#[tokio::test]
async fn requests_are_counted_across_the_loop() {
    let transport = MemoryTransport::new();
    let mut published = transport
        .take_published(SEND_SPEC)
        .expect("reply stream has not been taken");
    let mut runtime = HandlerRuntime::connect(transport.clone(), &settings(), Defaults)
        .await
        .expect("memory endpoints always open");
    let token = runtime.shutdown_token();

    transport.push_request(RECV_SPEC, get_frame(1));
    transport.push_request(RECV_SPEC, get_frame(2));

    let task = tokio::spawn(async move {
        runtime.run().await.expect("run loop exits cleanly");
        runtime
    });
    for _ in 0..2 {
        timeout(Duration::from_secs(5), published.recv())
            .await
            .expect("a reply should arrive")
            .expect("the reply stream is open");
    }
    token.cancel();
    let runtime = task.await.expect("run loop task joins");
    assert_eq!(runtime.requests_handled(), 2);
}

#[tokio::test]
async fn settings_lookup_feeds_the_connection() {
    let source = StaticSettings::new().with(settings());
    let found = source
        .require(APP_ID)
        .expect("the handler row is configured");

    let transport = MemoryTransport::new();
    let runtime = HandlerRuntime::connect(transport.clone(), &found, Defaults)
        .await
        .expect("memory endpoints always open");
    assert_eq!(runtime.connection().send_spec(), SEND_SPEC);
    assert_eq!(runtime.connection().recv_spec(), RECV_SPEC);
    assert_eq!(transport.sink_identity(SEND_SPEC), Some(APP_ID.to_owned()));
}
