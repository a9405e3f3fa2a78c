use super::*;
use crate::{
    request::{Headers, Request, RequestEnvelope, RequestRegistry},
    websocket::OpCode,
};

struct Defaults;

impl Handler for Defaults {}

fn classify(method: &str, body: &[u8], extra: &[(&str, &str)]) -> Request {
    let mut headers = Headers::new();
    headers.insert("METHOD", method);
    for (name, value) in extra {
        headers.insert(*name, *value);
    }
    let envelope = RequestEnvelope::new("abc", 42, "/", headers, body.to_vec());
    Request::from_envelope(envelope, &RequestRegistry::new())
        .expect("fixture envelope classifies")
}

#[tokio::test]
async fn default_http_answer_is_204() {
    let Request::Http(request) = classify("GET", b"", &[]) else {
        panic!("expected the HTTP variant");
    };
    let response = Defaults
        .handle(&request)
        .await
        .expect("default handler cannot fail")
        .expect("default handler replies");
    let Response::Http(mut response) = response else {
        panic!("expected an HTTP reply");
    };
    assert_eq!(response.status(), Some(204));
    assert_eq!(response.sender_id(), "abc");
    assert_eq!(response.conn_id(), 42);
    let bytes = response.to_bytes().expect("empty body serialises");
    assert!(bytes.starts_with(b"HTTP/1.1 204 No Content\r\n"));
}

#[tokio::test]
async fn default_message_answers_are_silent() {
    let Request::Json(json) = classify("JSON", br#"{"op":"ping"}"#, &[]) else {
        panic!("expected the JSON variant");
    };
    assert!(Defaults
        .handle_json(&json)
        .await
        .expect("default handler cannot fail")
        .is_none());
    assert!(Defaults
        .handle_disconnect(&json)
        .await
        .expect("default handler cannot fail")
        .is_none());

    let Request::Xml(xml) = classify("XML", b"<a/>", &[]) else {
        panic!("expected the XML variant");
    };
    assert!(Defaults
        .handle_xml(&xml)
        .await
        .expect("default handler cannot fail")
        .is_none());
}

#[tokio::test]
async fn default_websocket_answer_is_a_policy_close() {
    // An unfragmented frame with a reserved opcode nobody handles.
    let Request::WebSocket(request) =
        classify("WEBSOCKET", &[0x83, 0x00], &[("FLAGS", "83")])
    else {
        panic!("expected the WebSocket variant");
    };
    assert_eq!(request.opcode(), OpCode::Reserved(0x3));

    let response = Defaults
        .handle_websocket(&request)
        .await
        .expect("default handler cannot fail")
        .expect("default handler replies");
    let Response::WebSocket(response) = response else {
        panic!("expected a WebSocket reply");
    };
    assert_eq!(response.frame().opcode(), OpCode::Close);
    assert_eq!(response.frame().payload().as_ref(), &[0x03, 0xF0]);
}
