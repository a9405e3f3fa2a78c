use rstest::rstest;

use super::*;
use crate::websocket::OpCode;

fn envelope_fixture() -> RequestEnvelope {
    let mut headers = Headers::new();
    headers.insert("METHOD", "GET");
    headers.insert("PATH", "/demo");
    headers.insert("VERSION", "HTTP/1.1");
    RequestEnvelope::new("54c6755b-9628-40a4-9a2d-cc82a816345e", 9, "/demo", headers, "")
}

#[test]
fn decodes_a_tnetstring_header_frame() {
    let envelope =
        RequestEnvelope::decode(b"abc 42 / 11:4:PATH,1:/,}0:,").expect("frame is well formed");
    assert_eq!(envelope.sender_id(), "abc");
    assert_eq!(envelope.conn_id(), 42);
    assert_eq!(envelope.path(), "/");
    assert_eq!(envelope.headers().get_str("PATH"), Some("/"));
    assert!(envelope.body().is_empty());
    assert_eq!(envelope.raw().as_ref(), b"abc 42 / 11:4:PATH,1:/,}0:,");
}

#[test]
fn decodes_a_json_header_frame() {
    let envelope = RequestEnvelope::decode(b"abc 42 / 27:{\"METHOD\":\"GET\",\"PATH\":\"/\"},0:,")
        .expect("frame is well formed");
    assert_eq!(envelope.method(), Some("GET"));
    assert_eq!(envelope.headers().get_str("PATH"), Some("/"));
}

#[test]
fn repeated_headers_survive_as_lists() {
    let envelope = RequestEnvelope::decode(
        b"abc 1 / 40:6:cookie,12:3:a=1,3:b=2,]6:METHOD,3:GET,}0:,",
    )
    .expect("frame is well formed");
    assert_eq!(
        envelope.headers().get("cookie"),
        Some(&HeaderValue::List(vec!["a=1".into(), "b=2".into()]))
    );
    assert_eq!(envelope.headers().get_str("cookie"), Some("a=1"));
}

#[test]
fn bytes_after_the_body_are_ignored() {
    let envelope = RequestEnvelope::decode(b"abc 42 / 11:4:PATH,1:/,}0:,extra junk")
        .expect("frame is well formed");
    assert!(envelope.body().is_empty());
}

#[test]
fn envelope_round_trips_through_its_wire_form() {
    let envelope = envelope_fixture();
    let decoded = RequestEnvelope::decode(&envelope.encode()).expect("encoded frame decodes");
    assert_eq!(decoded, envelope);
}

#[rstest]
#[case::no_spaces(b"abc".as_slice())]
#[case::one_token_short(b"abc 42".as_slice())]
#[case::bad_conn_id(b"abc forty / 11:4:PATH,1:/,}0:,".as_slice())]
#[case::headers_not_a_dict(b"abc 42 / 1:5#0:,".as_slice())]
#[case::body_not_a_string(b"abc 42 / 11:4:PATH,1:/,}1:5#".as_slice())]
fn structurally_broken_frames_are_bad_requests(#[case] frame: &[u8]) {
    let err = RequestEnvelope::decode(frame).expect_err("frame is broken");
    assert!(
        matches!(err, RequestError::BadRequest(_)),
        "expected BadRequest, got {err:?}"
    );
}

#[test]
fn malformed_header_blob_is_a_tnetstring_error() {
    let err = RequestEnvelope::decode(b"abc 42 / x:oops,0:,").expect_err("blob is malformed");
    assert!(matches!(err, RequestError::Tnetstring(_)));
}

#[test]
fn http_method_builds_the_http_variant() {
    let registry = RequestRegistry::new();
    let request = Request::from_envelope(envelope_fixture(), &registry)
        .expect("GET classifies as HTTP");
    let Request::Http(request) = request else {
        panic!("expected the HTTP variant");
    };
    assert_eq!(request.method(), "GET");
    assert_eq!(request.version(), Some("HTTP/1.1"));
    assert!(!request.should_close());
}

#[test]
fn unknown_method_is_unhandled() {
    let mut headers = Headers::new();
    headers.insert("METHOD", "FOO");
    let envelope = RequestEnvelope::new("abc", 1, "/", headers, "");
    let err = Request::from_envelope(envelope, &RequestRegistry::new())
        .expect_err("FOO has no claim");
    assert_eq!(err, RequestError::UnhandledMethod("FOO".into()));
}

fn json_envelope(body: &str) -> RequestEnvelope {
    let mut headers = Headers::new();
    headers.insert("METHOD", "JSON");
    headers.insert("PATH", "@chat");
    RequestEnvelope::new("abc", 7, "@chat", headers, body.to_owned())
}

#[test]
fn json_method_parses_the_body() {
    let request = Request::from_envelope(json_envelope(r#"{"op":"ping"}"#), &RequestRegistry::new())
        .expect("body is valid JSON");
    let Request::Json(request) = request else {
        panic!("expected the JSON variant");
    };
    assert_eq!(request.data()["op"], "ping");
    assert!(!request.is_disconnect());
}

#[test]
fn disconnect_notice_is_recognised() {
    let request = Request::from_envelope(
        json_envelope(r#"{"type":"disconnect"}"#),
        &RequestRegistry::new(),
    )
    .expect("notice is valid JSON");
    assert!(request.is_disconnect());
}

#[rstest]
#[case::invalid(r"not json")]
#[case::non_object(r#"["disconnect"]"#)]
fn unusable_json_bodies_are_bad_requests(#[case] body: &str) {
    let err = Request::from_envelope(json_envelope(body), &RequestRegistry::new())
        .expect_err("body is unusable");
    assert!(matches!(err, RequestError::BadRequest(_)));
}

#[test]
fn xml_method_carries_the_fragment() {
    let mut headers = Headers::new();
    headers.insert("METHOD", "XML");
    let envelope = RequestEnvelope::new("abc", 3, "/events", headers, "<event type='ping'/>");
    let request = Request::from_envelope(envelope, &RequestRegistry::new())
        .expect("fragment is UTF-8");
    let Request::Xml(request) = request else {
        panic!("expected the XML variant");
    };
    assert_eq!(request.text(), "<event type='ping'/>");
}

#[test]
fn websocket_method_parses_frame_and_flags() {
    let mut headers = Headers::new();
    headers.insert("METHOD", "WEBSOCKET");
    headers.insert("FLAGS", "81");
    // Masked text frame carrying "hi" with an all-zero masking key.
    let body: &[u8] = &[0x81, 0x82, 0, 0, 0, 0, b'h', b'i'];
    let envelope = RequestEnvelope::new("abc", 5, "/socket", headers, body);
    let request = Request::from_envelope(envelope, &RequestRegistry::new())
        .expect("frame is well formed");
    let Request::WebSocket(request) = request else {
        panic!("expected the WebSocket variant");
    };
    assert_eq!(request.flags(), 0x81);
    assert_eq!(request.opcode(), OpCode::Text);
    assert!(request.fin());
    assert_eq!(request.payload().as_ref(), b"hi");
}

#[test]
fn http_request_reads_distinguished_headers() {
    let mut headers = Headers::new();
    headers.insert("METHOD", "POST");
    headers.insert("URI", "/upload?kind=csv");
    headers.insert("PATTERN", "/upload");
    headers.insert("VERSION", "HTTP/1.0");
    headers.insert("host", "example.com");
    headers.insert("content-type", "text/csv");
    headers.insert("content-length", "4");
    let envelope = RequestEnvelope::new("abc", 11, "/upload", headers, "a,b\n");
    let Ok(Request::Http(request)) =
        Request::from_envelope(envelope, &RequestRegistry::new())
    else {
        panic!("expected the HTTP variant");
    };
    assert_eq!(request.uri(), Some("/upload?kind=csv"));
    assert_eq!(request.pattern(), Some("/upload"));
    assert_eq!(request.host(), Some("example.com"));
    assert_eq!(request.content_type(), Some("text/csv"));
    assert_eq!(request.content_length(), Some(4));
    assert!(request.should_close(), "HTTP/1.0 closes by default");
}

#[test]
fn upload_notices_pair_start_and_done() {
    let mut headers = Headers::new();
    headers.insert("METHOD", "POST");
    headers.insert("x-mongrel2-upload-start", "/tmp/upload.1");
    let envelope = RequestEnvelope::new("abc", 2, "/", headers.clone(), "");
    let Ok(Request::Http(started)) =
        Request::from_envelope(envelope, &RequestRegistry::new())
    else {
        panic!("expected the HTTP variant");
    };
    assert_eq!(started.upload_started(), Some("/tmp/upload.1"));
    assert!(!started.upload_done());

    headers.insert("x-mongrel2-upload-done", "/tmp/upload.1");
    let envelope = RequestEnvelope::new("abc", 2, "/", headers, "");
    let Ok(Request::Http(done)) = Request::from_envelope(envelope, &RequestRegistry::new())
    else {
        panic!("expected the HTTP variant");
    };
    assert!(done.upload_done());
}

#[test]
fn response_copies_the_request_address() {
    let envelope = envelope_fixture();
    let Ok(Request::Http(request)) =
        Request::from_envelope(envelope, &RequestRegistry::new())
    else {
        panic!("expected the HTTP variant");
    };
    let response = request.response();
    assert_eq!(response.sender_id(), "54c6755b-9628-40a4-9a2d-cc82a816345e");
    assert_eq!(response.conn_id(), 9);
}
