//! Minimal handler wired to the in-process transport.
//!
//! A real deployment would implement `MessageTransport` over its messaging
//! layer and point the specs at a running Mongrel2; here the request is
//! injected by hand so the example is self-contained:
//!
//! ```sh
//! cargo run --example helloworld
//! ```

use async_trait::async_trait;
use mongrel2_handler::{
    transport::memory::MemoryTransport, Handler, HandlerResult, HandlerRuntime,
    HandlerSettings, Headers, HttpRequest, RequestEnvelope,
};

struct HelloWorld;

#[async_trait]
impl Handler for HelloWorld {
    async fn handle(&mut self, request: &HttpRequest) -> HandlerResult {
        let mut response = request.response();
        response.set_status(200);
        response.headers_mut().set("Content-Type", "text/plain");
        response.set_body(format!("Hello from {}\n", request.path()));
        Ok(Some(response.into()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = HandlerSettings::new(
        "54c6755b-9628-40a4-9a2d-cc82a816345e",
        "tcp://127.0.0.1:9996",
        "tcp://127.0.0.1:9997",
    );

    let transport = MemoryTransport::new();
    let mut published = transport
        .take_published(&settings.send_spec)
        .expect("reply stream is untaken");

    let mut runtime = HandlerRuntime::connect(transport.clone(), &settings, HelloWorld).await?;
    let token = runtime.shutdown_token();

    let mut headers = Headers::new();
    headers.insert("METHOD", "GET");
    headers.insert("PATH", "/hello");
    let frame = RequestEnvelope::new("demo-server", 1, "/hello", headers, "").encode();
    transport.push_request(&settings.recv_spec, frame);

    let loop_task = tokio::spawn(async move { runtime.run().await });

    if let Some(reply) = published.recv().await {
        print!("{}", String::from_utf8_lossy(&reply));
    }

    token.cancel();
    loop_task.await??;
    Ok(())
}
