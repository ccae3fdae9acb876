use anyhow::Context;
use pergola::{CallContext, GrpcTransport, Options, Request};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Every address is bound up front; calls rotate over them in order.
    let transport = GrpcTransport::new(
        Options::new(["127.0.0.1:5000", "127.0.0.1:5001"])
            .tracer(tracing::Dispatch::none())
            .caller("example"),
    )
    .await
    .context("failed to start transport")?;

    let response = transport
        .call(
            &CallContext::background(),
            &Request::new("test.Echo", "Echo")
                .timeout(Duration::from_secs(2))
                .body("hello"),
        )
        .await
        .context("echo call failed")?;

    println!("HEADERS={:?}", response.headers);
    println!("BODY={:?}", response.body);

    transport.close().await?;
    Ok(())
}
