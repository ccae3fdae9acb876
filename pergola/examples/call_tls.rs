use anyhow::Context;
use pergola::{CallContext, GrpcTransport, Options, Request};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (ca, cert, key) = match (args.next(), args.next(), args.next()) {
        (Some(ca), Some(cert), Some(key)) => (ca, cert, key),
        _ => anyhow::bail!("usage: call_tls <ca.pem> <client.pem> <client.key>"),
    };

    let transport = GrpcTransport::new(
        Options::new(["127.0.0.1:5000"])
            .tracer(tracing::Dispatch::none())
            .caller("example")
            .with_tls(ca, cert, key),
    )
    .await
    .context("failed to start transport")?;

    let response = transport
        .call(
            &CallContext::background(),
            &Request::new("test.Echo", "Echo").body("hello"),
        )
        .await?;

    println!("RESPONSE={:?}", response);

    transport.close().await?;
    Ok(())
}
